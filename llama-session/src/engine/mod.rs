//! Narrow interface to the inference engine.
//!
//! The session never touches weights, tokenizers or sampling distributions
//! directly. Everything it needs from the model is expressed by [`Engine`]
//! (decode, sample, KV position bookkeeping and state snapshots) and, for
//! callers that work with text, [`Tokenize`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod recorded;

pub use recorded::{EngineCall, Journal, Piece, RecordedEngine, RecordedScript};

/// Opaque vocabulary id produced and consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub i32);

impl Token {
    /// Sentinel meaning "no further output".
    pub const INVALID: Token = Token(-1);

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl From<i32> for Token {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures reported by the engine. All of them are fatal to the session
/// that observed them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Sampling failed: {0}")]
    Sample(String),

    #[error("State snapshot failed: {0}")]
    State(String),

    #[error("Encoder failed: {0}")]
    Encode(String),

    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Engine error: {0}")]
    Other(String),
}

impl EngineError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn sample(message: impl Into<String>) -> Self {
        Self::Sample(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }
}

/// One inference context over a loaded model.
///
/// Positions are absolute indices into the context's KV cache. The range
/// operations are only ever issued by context compaction and always use
/// half-open `[start, end)` ranges.
pub trait Engine {
    /// Commit `tokens` at positions `start_pos..start_pos + tokens.len()`.
    fn decode(&mut self, tokens: &[Token], start_pos: usize) -> Result<(), EngineError>;

    /// Sample the next token from the logits of the last decode.
    fn sample(&mut self) -> Result<Token, EngineError>;

    fn is_end_of_generation(&self, token: Token) -> bool;

    /// Physical size of the context in tokens.
    fn context_capacity(&self) -> usize;

    /// Largest number of tokens accepted by a single `decode` call.
    fn batch_size(&self) -> usize;

    /// Drop cached positions in `[start, end)`.
    fn remove_range(&mut self, start: usize, end: usize);

    /// Add `delta` to every cached position in `[start, end)`.
    fn shift_range(&mut self, start: usize, end: usize, delta: isize);

    /// Integer-divide every cached position in `[start, end)` by `factor`.
    fn divide_range(&mut self, start: usize, end: usize, factor: usize);

    fn state_snapshot(&self) -> Result<Vec<u8>, EngineError>;

    fn restore_state_snapshot(&mut self, bytes: &[u8]) -> Result<(), EngineError>;

    /// Beginning-of-sequence token, if the vocabulary defines one.
    fn bos_token(&self) -> Option<Token> {
        None
    }

    /// Whether the model runs an encoder before decoding (T5 style).
    fn has_encoder(&self) -> bool {
        false
    }

    fn encode(&mut self, _tokens: &[Token]) -> Result<(), EngineError> {
        Err(EngineError::Encode(
            "engine has no encoder stage".to_string(),
        ))
    }

    /// First token fed to the decoder after an encoder pass.
    fn decoder_start_token(&self) -> Option<Token> {
        self.bos_token()
    }

    /// Forget sampler-local history such as repetition penalties.
    fn reset_sampler(&mut self) {}
}

/// Text side of the engine: used by hosts, never by the session itself.
pub trait Tokenize {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, EngineError>;

    /// Raw bytes for a token. A single token may carry a partial UTF-8
    /// sequence that only becomes valid with its neighbours.
    fn token_to_piece(&self, token: Token) -> Result<Vec<u8>, EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn decode(&mut self, tokens: &[Token], start_pos: usize) -> Result<(), EngineError> {
        (**self).decode(tokens, start_pos)
    }

    fn sample(&mut self) -> Result<Token, EngineError> {
        (**self).sample()
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        (**self).is_end_of_generation(token)
    }

    fn context_capacity(&self) -> usize {
        (**self).context_capacity()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn remove_range(&mut self, start: usize, end: usize) {
        (**self).remove_range(start, end)
    }

    fn shift_range(&mut self, start: usize, end: usize, delta: isize) {
        (**self).shift_range(start, end, delta)
    }

    fn divide_range(&mut self, start: usize, end: usize, factor: usize) {
        (**self).divide_range(start, end, factor)
    }

    fn state_snapshot(&self) -> Result<Vec<u8>, EngineError> {
        (**self).state_snapshot()
    }

    fn restore_state_snapshot(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        (**self).restore_state_snapshot(bytes)
    }

    fn bos_token(&self) -> Option<Token> {
        (**self).bos_token()
    }

    fn has_encoder(&self) -> bool {
        (**self).has_encoder()
    }

    fn encode(&mut self, tokens: &[Token]) -> Result<(), EngineError> {
        (**self).encode(tokens)
    }

    fn decoder_start_token(&self) -> Option<Token> {
        (**self).decoder_start_token()
    }

    fn reset_sampler(&mut self) {
        (**self).reset_sampler()
    }
}
