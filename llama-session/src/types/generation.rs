//! Generation request and streaming response types.

use crate::engine::Token;
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default token budget when a request does not set one.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Request for a streamed generation over a fresh session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Tokens of the initial prompt, already formatted and tokenized.
    pub prompt: Vec<Token>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Stop sequences; the matched text is never streamed.
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

impl GenerationRequest {
    pub fn new(prompt: Vec<Token>) -> Self {
        Self {
            prompt,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop: Vec::new(),
            session: SessionConfig::default(),
        }
    }

    /// Set max_tokens using builder pattern
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Add one stop sequence
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

/// Reason why text generation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The engine produced an end-of-generation token.
    EndOfSequence,
    /// The request's token budget was used up.
    MaxTokens,
    /// A registered stop sequence completed; carries the matched pattern.
    StopSequence(String),
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::EndOfSequence => write!(f, "EndOfSequence"),
            FinishReason::MaxTokens => write!(f, "MaxTokens"),
            FinishReason::StopSequence(s) => write!(f, "StopSequence({:?})", s),
        }
    }
}

/// One message on a generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub is_complete: bool,
    /// Tokens generated so far, including the ones behind this chunk
    pub token_count: usize,
    /// Finish reason, only present when is_complete is true
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(text: String, token_count: usize) -> Self {
        Self {
            text,
            is_complete: false,
            token_count,
            finish_reason: None,
        }
    }

    pub fn finished(reason: FinishReason, token_count: usize) -> Self {
        Self {
            text: String::new(),
            is_complete: true,
            token_count,
            finish_reason: Some(reason),
        }
    }
}
