//! # Generation Stoppers
//!
//! Conditions that end a generation loop. The session itself never stops on
//! its own apart from end-of-generation tokens; the host evaluates each
//! [`Stopper`] after every produced token and ends the stream with the first
//! [`FinishReason`] returned.
//!
//! - [`MaxTokensStopper`]: token budget per request
//! - [`StopSequenceSet`]: antiprompts detected incrementally in the
//!   detokenized text, built from one [`StopSequenceMatcher`] per pattern
//!
//! ```rust
//! use llama_session::engine::Token;
//! use llama_session::stopper::{Stopper, StopSequenceSet};
//! use llama_session::types::FinishReason;
//!
//! let mut stops = StopSequenceSet::from_patterns(["\nUser:"]).unwrap();
//! assert_eq!(stops.observe(Token(5), "Done.\nUs"), None);
//! assert!(stops.has_running_matches());
//! assert_eq!(
//!     stops.observe(Token(6), "er:"),
//!     Some(FinishReason::StopSequence("\nUser:".to_string()))
//! );
//! ```

use crate::engine::Token;
use crate::types::FinishReason;

pub mod max_tokens;
pub mod stop_sequence;

pub use max_tokens::MaxTokensStopper;
pub use stop_sequence::{StopSequenceMatcher, StopSequenceSet};

/// Trait for determining when to stop text generation.
///
/// Stoppers are per-request and stateful: `Send` so a request can move to a
/// worker thread, never shared between requests.
pub trait Stopper: Send {
    /// Look at one generated token and its decoded text. `piece` may be
    /// empty when the token only carried part of a UTF-8 sequence.
    fn observe(&mut self, token: Token, piece: &str) -> Option<FinishReason>;

    /// Forget all progress, e.g. before reusing the stopper for a new turn.
    fn reset(&mut self) {}
}
