//! # Llama Session
//!
//! Interactive generation sessions over an opaque inference engine:
//! token context window management (context shifting and grouped-attention
//! self-extend), sub-batched decoding, streaming stop-sequence detection and
//! a thin streaming host.
//!
//! ```rust
//! use llama_session::engine::{RecordedEngine, Token};
//! use llama_session::session::{GenerationSession, SessionConfig};
//!
//! let engine = RecordedEngine::new(128, 32)
//!     .with_samples([Token(7), Token(8), Token(2)])
//!     .with_end_of_generation(Token(2));
//! let mut session = GenerationSession::new(engine, SessionConfig::default()).unwrap();
//!
//! session.set_initial_prompt(&[Token(1), Token(2), Token(3)]).unwrap();
//! assert_eq!(session.get_token().unwrap(), Token(7));
//! assert_eq!(session.get_token().unwrap(), Token(8));
//! assert_eq!(session.get_token().unwrap(), Token::INVALID);
//! assert_eq!(session.window().num_past(), 5);
//! ```

pub mod engine;
pub mod host;
pub mod session;
pub mod stopper;
pub mod types;

pub use engine::{Engine, EngineError, RecordedEngine, Token, Tokenize};
pub use host::{ContextFactory, SessionHost, SharedModelFactory};
pub use session::{ContextWindow, GenerationSession, SessionConfig, SessionState};
pub use stopper::{MaxTokensStopper, StopSequenceMatcher, StopSequenceSet, Stopper};
pub use types::{
    FinishReason, GenerationRequest, HostError, SessionError, SessionId, StopSequenceError,
    StreamChunk,
};
