//! Shared types: errors, identifiers and the generation request/stream types.

pub mod errors;
pub mod generation;
pub mod ids;

pub use errors::{HostError, SessionError, StopSequenceError};
pub use generation::{FinishReason, GenerationRequest, StreamChunk, DEFAULT_MAX_TOKENS};
pub use ids::SessionId;
