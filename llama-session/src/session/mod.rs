//! Generation session: one engine context, its token window and the
//! prompt/generate state machine.
//!
//! ```text
//! Uninitialized --set_initial_prompt / set_state--> Initialized --get_token--> Generating
//!                                                    push_prompt ok here      push_prompt ok here
//! ```
//!
//! A session is driven by a single owner through `&mut self`; it does no
//! locking of its own. Any engine failure poisons the session, after which
//! every operation fails with `InvalidState`.

use crate::engine::{Engine, EngineError, Token};
use crate::types::{SessionError, SessionId};
use llama_common::ValidatedConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

pub mod config;
mod snapshot;
pub mod window;

pub use config::SessionConfig;
pub use window::ContextWindow;

/// Lifecycle of a [`GenerationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Generating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::Generating => write!(f, "generating"),
        }
    }
}

/// Drives one inference context through prompt ingestion and
/// token-by-token generation while keeping its window within capacity.
pub struct GenerationSession<E: Engine> {
    id: SessionId,
    engine: E,
    config: SessionConfig,
    window: ContextWindow,
    state: SessionState,
    poisoned: bool,
    tokens_generated: usize,
}

impl<E: Engine> GenerationSession<E> {
    pub fn new(engine: E, config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;

        let capacity = engine.context_capacity();
        if config.context_margin >= capacity {
            return Err(SessionError::invalid_argument(format!(
                "context margin ({}) must be smaller than the context capacity ({})",
                config.context_margin, capacity
            )));
        }
        if engine.batch_size() == 0 {
            return Err(SessionError::invalid_argument(
                "engine batch size must be greater than 0",
            ));
        }

        let max_tokens = capacity - config.context_margin;
        if config.uses_self_extend() && config.ga_width > max_tokens {
            return Err(SessionError::invalid_argument(format!(
                "ga_width ({}) must not exceed the {} token window",
                config.ga_width, max_tokens
            )));
        }

        let id = SessionId::new();
        info!(
            "Created session {} (max_tokens={}, batch_size={}, self_extend={})",
            id,
            max_tokens,
            engine.batch_size(),
            config.uses_self_extend()
        );

        Ok(Self {
            id,
            engine,
            config,
            window: ContextWindow::new(max_tokens),
            state: SessionState::Uninitialized,
            poisoned: false,
            tokens_generated: 0,
        })
    }

    /// Seed the session. An empty prompt becomes the engine's BOS token.
    pub fn set_initial_prompt(&mut self, tokens: &[Token]) -> Result<(), SessionError> {
        self.ensure_usable()?;
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::invalid_state(format!(
                "initial prompt already set (session is {})",
                self.state
            )));
        }

        let mut prompt = tokens.to_vec();
        if prompt.is_empty() {
            if let Some(bos) = self.engine.bos_token() {
                debug!("Session {}: empty prompt, substituting BOS", self.id);
                prompt.push(bos);
            }
        }
        if prompt.is_empty() {
            return Err(SessionError::invalid_argument(
                "initial prompt is empty and the engine has no BOS token",
            ));
        }

        let max_tokens = self.window.max_tokens;
        if prompt.len() > max_tokens {
            if !self.config.truncate_oversized {
                return Err(SessionError::invalid_argument(format!(
                    "initial prompt has {} tokens, window holds {}",
                    prompt.len(),
                    max_tokens
                )));
            }
            warn!(
                "Session {}: initial prompt of {} tokens truncated to {}",
                self.id,
                prompt.len(),
                max_tokens
            );
            prompt.truncate(max_tokens);
        }

        if self.engine.has_encoder() {
            if let Err(e) = self.engine.encode(&prompt) {
                return Err(self.poison(e.into()));
            }
            let Some(start) = self.engine.decoder_start_token() else {
                let err = EngineError::Encode("encoder model has no decoder start token".to_string());
                return Err(self.poison(err.into()));
            };
            debug!(
                "Session {}: encoded {} prompt tokens",
                self.id,
                prompt.len()
            );
            prompt = vec![start];
        }

        self.state = SessionState::Initialized;
        self.decode_submission(&prompt)?;
        // self-extend may already have compressed part of the prompt
        self.window.num_keep = prompt.len().min(self.window.num_past);
        info!(
            "Session {}: initial prompt accepted ({} tokens kept)",
            self.id, self.window.num_keep
        );
        Ok(())
    }

    /// Append a user turn without producing output.
    pub fn push_prompt(&mut self, tokens: &[Token]) -> Result<(), SessionError> {
        self.ensure_usable()?;
        if self.state == SessionState::Uninitialized {
            return Err(SessionError::invalid_state(
                "push_prompt called before set_initial_prompt",
            ));
        }
        if tokens.is_empty() {
            return Ok(());
        }

        self.engine.reset_sampler();

        let mut input = Vec::with_capacity(tokens.len() + 1);
        if self.config.bos_on_push {
            if let Some(bos) = self.engine.bos_token() {
                input.push(bos);
            }
        }
        input.extend_from_slice(tokens);
        self.decode_submission(&input)
    }

    /// Generate one token.
    ///
    /// Returns [`Token::INVALID`] without decoding when the engine signals
    /// end of generation; otherwise the sampled token is decoded back into
    /// the context before it is returned.
    pub fn get_token(&mut self) -> Result<Token, SessionError> {
        self.ensure_usable()?;
        if self.state == SessionState::Uninitialized {
            return Err(SessionError::invalid_state(
                "get_token called before set_initial_prompt",
            ));
        }
        self.state = SessionState::Generating;

        let token = match self.engine.sample() {
            Ok(token) => token,
            Err(e) => return Err(self.poison(e.into())),
        };
        if self.engine.is_end_of_generation(token) {
            debug!(
                "Session {}: end of generation after {} tokens",
                self.id, self.tokens_generated
            );
            return Ok(Token::INVALID);
        }

        self.decode_submission(&[token])?;
        self.tokens_generated += 1;
        Ok(token)
    }

    /// Snapshot the engine state together with the window counters.
    pub fn get_state(&self) -> Result<Vec<u8>, SessionError> {
        self.ensure_usable()?;
        let engine_state = self.engine.state_snapshot()?;
        Ok(snapshot::encode(&self.window, &engine_state))
    }

    /// Restore a snapshot taken by [`GenerationSession::get_state`]. Only a
    /// fresh session can be restored into.
    pub fn set_state(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.ensure_usable()?;
        if self.state != SessionState::Uninitialized {
            return Err(SessionError::invalid_state(format!(
                "set_state requires an uninitialized session (session is {})",
                self.state
            )));
        }

        let (header, engine_state) = snapshot::decode(bytes)?;
        let restored = ContextWindow {
            max_tokens: self.window.max_tokens,
            num_keep: header.num_keep,
            num_past: header.num_past,
            ga_index: header.ga_index,
        };
        if !restored.is_consistent() {
            return Err(SessionError::invalid_argument(format!(
                "snapshot counters (keep={}, past={}) do not fit a {} token window",
                header.num_keep, header.num_past, restored.max_tokens
            )));
        }

        if let Err(e) = self.engine.restore_state_snapshot(engine_state) {
            return Err(self.poison(e.into()));
        }
        self.window = restored;
        self.state = SessionState::Initialized;
        info!(
            "Session {}: restored state ({} tokens resident)",
            self.id, restored.num_past
        );
        Ok(())
    }

    pub fn session_id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    pub fn max_tokens(&self) -> usize {
        self.window.max_tokens
    }

    /// Tokens returned by `get_token`, end-of-generation excluded.
    pub fn tokens_generated(&self) -> usize {
        self.tokens_generated
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Release the engine context, e.g. to hand it back to a pool.
    pub fn into_engine(self) -> E {
        self.engine
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        if self.poisoned {
            return Err(SessionError::invalid_state(format!(
                "session {} is unusable after an engine failure",
                self.id
            )));
        }
        Ok(())
    }

    fn poison(&mut self, err: SessionError) -> SessionError {
        error!("Session {}: {}", self.id, err);
        self.poisoned = true;
        err
    }

    /// Decode one submission: truncate to the window, then feed it to the
    /// engine in batch-sized chunks, compacting before each chunk.
    fn decode_submission(&mut self, tokens: &[Token]) -> Result<(), SessionError> {
        let max_tokens = self.window.max_tokens;
        let tokens = if tokens.len() > max_tokens {
            warn!(
                "Session {}: submission of {} tokens truncated to {}",
                self.id,
                tokens.len(),
                max_tokens
            );
            &tokens[..max_tokens]
        } else {
            tokens
        };

        let batch_size = self.engine.batch_size();
        for chunk in tokens.chunks(batch_size) {
            self.make_room(chunk.len())?;
            if let Err(e) = self.engine.decode(chunk, self.window.num_past) {
                return Err(self.poison(e.into()));
            }
            self.window.num_past += chunk.len();
        }
        Ok(())
    }

    fn make_room(&mut self, incoming: usize) -> Result<(), SessionError> {
        if self.config.uses_self_extend() {
            self.window
                .self_extend(&mut self.engine, self.config.ga_factor, self.config.ga_width);
            if self.window.num_past + incoming > self.window.max_tokens {
                return Err(SessionError::ContextFull {
                    num_past: self.window.num_past,
                    incoming,
                    max_tokens: self.window.max_tokens,
                });
            }
            Ok(())
        } else {
            self.window
                .shift_context(&mut self.engine, incoming, self.config.infinite_context)
        }
    }
}

impl<E: Engine> fmt::Debug for GenerationSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("window", &self.window)
            .field("poisoned", &self.poisoned)
            .field("tokens_generated", &self.tokens_generated)
            .finish()
    }
}
