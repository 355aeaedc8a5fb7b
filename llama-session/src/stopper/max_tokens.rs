use super::Stopper;
use crate::engine::Token;
use crate::types::FinishReason;
use tracing::{debug, info, warn};

/// Stopper that limits generation to a maximum number of tokens.
///
/// Every observed token counts, including ones whose text is withheld or
/// empty, so the budget bounds engine work rather than visible output.
///
/// # Examples
///
/// ```rust
/// use llama_session::engine::Token;
/// use llama_session::stopper::{MaxTokensStopper, Stopper};
/// use llama_session::types::FinishReason;
///
/// let mut stopper = MaxTokensStopper::new(2);
/// assert_eq!(stopper.observe(Token(10), "Hel"), None);
/// assert_eq!(stopper.observe(Token(11), "lo"), Some(FinishReason::MaxTokens));
/// assert_eq!(stopper.tokens_remaining(), 0);
/// ```
#[derive(Debug)]
pub struct MaxTokensStopper {
    /// Maximum number of generated tokens, prompt excluded. Zero stops
    /// before the first token.
    max_tokens: usize,

    /// Running count of tokens generated so far.
    tokens_generated: usize,
}

impl MaxTokensStopper {
    pub fn new(max_tokens: usize) -> Self {
        debug!(
            "Creating MaxTokensStopper with limit: {} tokens",
            max_tokens
        );

        if max_tokens == 0 {
            warn!("MaxTokensStopper created with 0 token limit - will stop immediately");
        } else if max_tokens > 50000 {
            warn!(
                "MaxTokensStopper created with very high token limit ({}), consider if this is intentional",
                max_tokens
            );
        }

        Self {
            max_tokens,
            tokens_generated: 0,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn tokens_generated(&self) -> usize {
        self.tokens_generated
    }

    /// Tokens left before the limit, or 0 once it is reached.
    pub fn tokens_remaining(&self) -> usize {
        self.max_tokens.saturating_sub(self.tokens_generated)
    }

    pub fn is_limit_reached(&self) -> bool {
        self.tokens_generated >= self.max_tokens
    }
}

impl Stopper for MaxTokensStopper {
    fn observe(&mut self, _token: Token, _piece: &str) -> Option<FinishReason> {
        self.tokens_generated = self.tokens_generated.saturating_add(1);

        if self.is_limit_reached() {
            info!(
                max_tokens = self.max_tokens,
                tokens_generated = self.tokens_generated,
                "MaxTokensStopper triggered - stopping generation"
            );
            return Some(FinishReason::MaxTokens);
        }

        if self.tokens_generated % 100 == 0 {
            debug!(
                "Generation progress: {}/{} tokens ({}% complete)",
                self.tokens_generated,
                self.max_tokens,
                (self.tokens_generated * 100 / self.max_tokens)
            );
        }
        None
    }

    fn reset(&mut self) {
        self.tokens_generated = 0;
    }
}
