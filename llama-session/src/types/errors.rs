//! Error types for sessions, stop sequences and the streaming host.

use crate::engine::EngineError;
use llama_common::error::{ErrorCategory, LlamaError};
use llama_loader::ModelError;
use thiserror::Error;

/// Errors raised by a [`GenerationSession`](crate::session::GenerationSession).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Context full: {num_past} resident + {incoming} incoming tokens exceed the {max_tokens} token window")]
    ContextFull {
        num_past: usize,
        incoming: usize,
        max_tokens: usize,
    },

    #[error("Engine failure: {0}")]
    EngineFailure(#[from] EngineError),
}

impl SessionError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

impl LlamaError for SessionError {
    fn category(&self) -> ErrorCategory {
        match self {
            SessionError::InvalidArgument(_) => ErrorCategory::User,
            SessionError::InvalidState(_) => ErrorCategory::User,
            SessionError::ContextFull { .. } => ErrorCategory::User,
            SessionError::EngineFailure(_) => ErrorCategory::External,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SessionError::InvalidArgument(_) => "SESSION_INVALID_ARGUMENT",
            SessionError::InvalidState(_) => "SESSION_INVALID_STATE",
            SessionError::ContextFull { .. } => "SESSION_CONTEXT_FULL",
            SessionError::EngineFailure(_) => "SESSION_ENGINE_FAILURE",
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            SessionError::InvalidArgument(msg) => {
                format!("Invalid argument: {}\n💡 Check the prompt is non-empty and fits the context window", msg)
            }
            SessionError::InvalidState(msg) => {
                format!("Invalid session state: {}\n💡 Check that the session is in the correct state for this operation", msg)
            }
            SessionError::ContextFull { max_tokens, .. } => {
                format!("Context full ({} tokens)\n💡 Enable infinite_context or start a new session", max_tokens)
            }
            SessionError::EngineFailure(e) => {
                format!("Engine failure: {}\n💡 The session is no longer usable; create a new one", e)
            }
        }
    }

    fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            SessionError::ContextFull { .. } => vec![
                "Set infinite_context: true to allow context shifting".to_string(),
                "Shorten the prompt or start a new session".to_string(),
            ],
            SessionError::EngineFailure(_) => {
                vec!["Drop this session and create a new one".to_string()]
            }
            _ => vec![],
        }
    }
}

/// Errors raised while registering stop sequences.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StopSequenceError {
    #[error("Invalid stop sequence: {0}")]
    InvalidArgument(String),
}

impl From<StopSequenceError> for SessionError {
    fn from(err: StopSequenceError) -> Self {
        match err {
            StopSequenceError::InvalidArgument(msg) => SessionError::InvalidArgument(msg),
        }
    }
}

impl LlamaError for StopSequenceError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::User
    }

    fn error_code(&self) -> &'static str {
        "STOP_SEQUENCE_INVALID"
    }
}

/// Errors surfaced on a host generation stream.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Failed to create engine context: {0}")]
    Context(#[from] ModelError),

    #[error("Detokenization failed: {0}")]
    Engine(#[from] EngineError),
}

impl From<StopSequenceError> for HostError {
    fn from(err: StopSequenceError) -> Self {
        HostError::Session(err.into())
    }
}

impl LlamaError for HostError {
    fn category(&self) -> ErrorCategory {
        match self {
            HostError::Session(e) => e.category(),
            HostError::Context(e) => e.category(),
            HostError::Engine(_) => ErrorCategory::External,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            HostError::Session(e) => e.error_code(),
            HostError::Context(e) => e.error_code(),
            HostError::Engine(_) => "HOST_DETOKENIZE_FAILED",
        }
    }
}
