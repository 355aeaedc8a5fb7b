use crate::types::SessionError;
use llama_common::ValidatedConfig;
use serde::{Deserialize, Serialize};

/// Per-session context policy.
///
/// `ga_factor == 1` selects context shifting; anything larger selects
/// grouped-attention self-extend with groups of `ga_width` positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tokens of physical capacity held back from the window.
    pub context_margin: usize,
    /// Self-extend group factor.
    pub ga_factor: usize,
    /// Self-extend group width; must be a multiple of `ga_factor`.
    pub ga_width: usize,
    /// Shift the context on overflow instead of failing with `ContextFull`.
    pub infinite_context: bool,
    /// Truncate an oversized initial prompt instead of rejecting it.
    pub truncate_oversized: bool,
    /// Decode the engine's BOS token before every interactive push.
    pub bos_on_push: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_margin: 4,
            ga_factor: 1,
            ga_width: 512,
            infinite_context: true,
            truncate_oversized: false,
            bos_on_push: false,
        }
    }
}

impl SessionConfig {
    /// Self-extend (grouped attention) rather than context shifting.
    pub fn uses_self_extend(&self) -> bool {
        self.ga_factor > 1
    }
}

impl ValidatedConfig for SessionConfig {
    type Error = SessionError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.ga_factor == 0 {
            return Err(SessionError::invalid_argument(
                "ga_factor must be at least 1",
            ));
        }
        if self.uses_self_extend() {
            if self.ga_width == 0 {
                return Err(SessionError::invalid_argument(
                    "ga_width must be greater than 0 when self-extend is enabled",
                ));
            }
            if self.ga_width % self.ga_factor != 0 {
                return Err(SessionError::invalid_argument(format!(
                    "ga_width ({}) must be a multiple of ga_factor ({})",
                    self.ga_width, self.ga_factor
                )));
            }
        }
        Ok(())
    }

    fn merge_with_defaults(self, _defaults: Self) -> Self {
        self
    }

    fn description() -> &'static str {
        "Context window policy for generation sessions"
    }
}
