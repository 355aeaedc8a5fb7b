//! Recorded engine for fixture playback
//!
//! Plays back a scripted list of sampled tokens while modelling the KV cache
//! as a list of `(token, position)` cells, so context shifting and
//! self-extend can be observed exactly. Every call lands in a shared
//! [`Journal`] that stays readable after the engine has moved into a session
//! or onto a worker thread.

use super::{Engine, EngineError, Token, Tokenize};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// One engine call as observed by the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Decode { tokens: Vec<Token>, start_pos: usize },
    Sample(Token),
    Encode { tokens: usize },
    RemoveRange { start: usize, end: usize },
    ShiftRange { start: usize, end: usize, delta: isize },
    DivideRange { start: usize, end: usize, factor: usize },
    ResetSampler,
    Snapshot,
    Restore,
}

impl EngineCall {
    fn is_range_op(&self) -> bool {
        matches!(
            self,
            EngineCall::RemoveRange { .. }
                | EngineCall::ShiftRange { .. }
                | EngineCall::DivideRange { .. }
        )
    }
}

/// Shared call log of a [`RecordedEngine`].
#[derive(Debug, Clone, Default)]
pub struct Journal {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl Journal {
    fn lock(&self) -> MutexGuard<'_, Vec<EngineCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: EngineCall) {
        self.lock().push(call);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().clone()
    }

    pub fn decode_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|c| matches!(c, EngineCall::Decode { .. }))
            .count()
    }

    /// Number of remove/shift/divide calls issued by compaction.
    pub fn range_ops(&self) -> usize {
        self.lock().iter().filter(|c| c.is_range_op()).count()
    }
}

/// Vocabulary entry used for detokenization playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub token: Token,
    #[serde(default)]
    pub text: String,
    /// Raw bytes overriding `text`, for tokens carrying partial UTF-8.
    #[serde(default)]
    pub bytes: Option<Vec<u8>>,
}

impl Piece {
    fn bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(self.text.as_bytes())
    }
}

/// Serializable script describing a recorded engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedScript {
    pub context_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub bos_token: Option<Token>,
    #[serde(default)]
    pub end_of_generation: Vec<Token>,
    /// Tokens returned by successive `sample` calls.
    #[serde(default)]
    pub samples: Vec<Token>,
    #[serde(default)]
    pub vocabulary: Vec<Piece>,
    /// Run an encoder pass and start decoding from this token.
    #[serde(default)]
    pub decoder_start_token: Option<Token>,
    /// Zero-based index of a `decode` call that should fail.
    #[serde(default)]
    pub fail_decode_at: Option<usize>,
}

fn default_batch_size() -> usize {
    512
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cell {
    token: Token,
    pos: isize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    cells: Vec<Cell>,
    samples: Vec<Token>,
    next_sample: usize,
}

/// Deterministic [`Engine`] + [`Tokenize`] implementation for tests and
/// demos. No model is loaded; outputs come from the script.
#[derive(Debug)]
pub struct RecordedEngine {
    script: RecordedScript,
    cells: Vec<Cell>,
    next_sample: usize,
    decode_calls: usize,
    journal: Journal,
}

impl RecordedEngine {
    pub fn new(context_capacity: usize, batch_size: usize) -> Self {
        Self::from_script(RecordedScript {
            context_capacity,
            batch_size,
            bos_token: None,
            end_of_generation: Vec::new(),
            samples: Vec::new(),
            vocabulary: Vec::new(),
            decoder_start_token: None,
            fail_decode_at: None,
        })
    }

    pub fn from_script(script: RecordedScript) -> Self {
        Self {
            script,
            cells: Vec::new(),
            next_sample: 0,
            decode_calls: 0,
            journal: Journal::default(),
        }
    }

    /// Load a recorded script from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Other(format!(
                "Failed to read fixture at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        let script: RecordedScript = serde_json::from_str(&content).map_err(|e| {
            EngineError::Other(format!(
                "Failed to parse fixture JSON at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Ok(Self::from_script(script))
    }

    pub fn with_samples(mut self, samples: impl IntoIterator<Item = Token>) -> Self {
        self.script.samples.extend(samples);
        self
    }

    pub fn with_end_of_generation(mut self, token: Token) -> Self {
        self.script.end_of_generation.push(token);
        self
    }

    pub fn with_bos(mut self, token: Token) -> Self {
        self.script.bos_token = Some(token);
        self
    }

    /// Turn on the encoder stage, decoding from `decoder_start` afterwards.
    pub fn with_encoder(mut self, decoder_start: Token) -> Self {
        self.script.decoder_start_token = Some(decoder_start);
        self
    }

    pub fn with_piece(mut self, token: Token, text: impl Into<String>) -> Self {
        self.script.vocabulary.push(Piece {
            token,
            text: text.into(),
            bytes: None,
        });
        self
    }

    pub fn with_piece_bytes(mut self, token: Token, bytes: impl Into<Vec<u8>>) -> Self {
        self.script.vocabulary.push(Piece {
            token,
            text: String::new(),
            bytes: Some(bytes.into()),
        });
        self
    }

    pub fn fail_decode_at(mut self, call: usize) -> Self {
        self.script.fail_decode_at = Some(call);
        self
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Tokens held in the modelled KV cache, in insertion order.
    pub fn resident_tokens(&self) -> Vec<Token> {
        self.cells.iter().map(|c| c.token).collect()
    }

    /// Positions of the resident tokens, in insertion order.
    pub fn positions(&self) -> Vec<isize> {
        self.cells.iter().map(|c| c.pos).collect()
    }

    pub fn samples_remaining(&self) -> usize {
        self.script.samples.len().saturating_sub(self.next_sample)
    }

    fn cells_in(&mut self, start: usize, end: usize) -> impl Iterator<Item = &mut Cell> {
        let (start, end) = (start as isize, end as isize);
        self.cells
            .iter_mut()
            .filter(move |c| c.pos >= start && c.pos < end)
    }
}

impl Engine for RecordedEngine {
    fn decode(&mut self, tokens: &[Token], start_pos: usize) -> Result<(), EngineError> {
        let call = self.decode_calls;
        self.decode_calls += 1;
        self.journal.record(EngineCall::Decode {
            tokens: tokens.to_vec(),
            start_pos,
        });

        if self.script.fail_decode_at == Some(call) {
            return Err(EngineError::decode(format!(
                "scripted failure on decode call {}",
                call
            )));
        }
        if tokens.len() > self.script.batch_size {
            return Err(EngineError::decode(format!(
                "batch of {} tokens exceeds batch size {}",
                tokens.len(),
                self.script.batch_size
            )));
        }
        if start_pos + tokens.len() > self.script.context_capacity {
            return Err(EngineError::decode(format!(
                "positions {}..{} exceed context capacity {}",
                start_pos,
                start_pos + tokens.len(),
                self.script.context_capacity
            )));
        }

        self.cells
            .extend(tokens.iter().enumerate().map(|(i, &token)| Cell {
                token,
                pos: (start_pos + i) as isize,
            }));
        Ok(())
    }

    fn sample(&mut self) -> Result<Token, EngineError> {
        let Some(&token) = self.script.samples.get(self.next_sample) else {
            return Err(EngineError::sample(format!(
                "Recorded script exhausted: attempted sample {} but only {} recorded",
                self.next_sample + 1,
                self.script.samples.len()
            )));
        };
        self.next_sample += 1;
        self.journal.record(EngineCall::Sample(token));
        Ok(token)
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        self.script.end_of_generation.contains(&token)
    }

    fn context_capacity(&self) -> usize {
        self.script.context_capacity
    }

    fn batch_size(&self) -> usize {
        self.script.batch_size
    }

    fn remove_range(&mut self, start: usize, end: usize) {
        self.journal.record(EngineCall::RemoveRange { start, end });
        let (lo, hi) = (start as isize, end as isize);
        self.cells.retain(|c| c.pos < lo || c.pos >= hi);
    }

    fn shift_range(&mut self, start: usize, end: usize, delta: isize) {
        self.journal
            .record(EngineCall::ShiftRange { start, end, delta });
        for cell in self.cells_in(start, end) {
            cell.pos += delta;
        }
    }

    fn divide_range(&mut self, start: usize, end: usize, factor: usize) {
        self.journal
            .record(EngineCall::DivideRange { start, end, factor });
        for cell in self.cells_in(start, end) {
            cell.pos /= factor as isize;
        }
    }

    fn state_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        self.journal.record(EngineCall::Snapshot);
        let saved = SavedState {
            cells: self.cells.clone(),
            samples: self.script.samples.clone(),
            next_sample: self.next_sample,
        };
        serde_json::to_vec(&saved).map_err(|e| EngineError::state(e.to_string()))
    }

    fn restore_state_snapshot(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.journal.record(EngineCall::Restore);
        let saved: SavedState =
            serde_json::from_slice(bytes).map_err(|e| EngineError::state(e.to_string()))?;
        self.cells = saved.cells;
        self.script.samples = saved.samples;
        self.next_sample = saved.next_sample;
        Ok(())
    }

    fn bos_token(&self) -> Option<Token> {
        self.script.bos_token
    }

    fn has_encoder(&self) -> bool {
        self.script.decoder_start_token.is_some()
    }

    fn encode(&mut self, tokens: &[Token]) -> Result<(), EngineError> {
        self.journal.record(EngineCall::Encode {
            tokens: tokens.len(),
        });
        Ok(())
    }

    fn decoder_start_token(&self) -> Option<Token> {
        self.script.decoder_start_token
    }

    fn reset_sampler(&mut self) {
        self.journal.record(EngineCall::ResetSampler);
    }
}

impl Tokenize for RecordedEngine {
    /// Greedy longest-match over the textual vocabulary.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        if add_bos {
            if let Some(bos) = self.script.bos_token {
                tokens.push(bos);
            }
        }

        let mut rest = text;
        while !rest.is_empty() {
            let best = self
                .script
                .vocabulary
                .iter()
                .filter(|p| p.bytes.is_none() && !p.text.is_empty() && rest.starts_with(&p.text))
                .max_by_key(|p| p.text.len());
            let Some(piece) = best else {
                return Err(EngineError::Tokenize(format!(
                    "no vocabulary entry matches {:?}",
                    rest
                )));
            };
            tokens.push(piece.token);
            rest = &rest[piece.text.len()..];
        }
        Ok(tokens)
    }

    fn token_to_piece(&self, token: Token) -> Result<Vec<u8>, EngineError> {
        self.script
            .vocabulary
            .iter()
            .find(|p| p.token == token)
            .map(|p| p.bytes().to_vec())
            .ok_or_else(|| EngineError::Tokenize(format!("unknown token {}", token)))
    }
}
