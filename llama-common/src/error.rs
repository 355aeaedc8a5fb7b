//! Shared error categorisation for consistent error handling across crates

use std::fmt::Debug;

/// Category of error for consistent handling and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller misuse or bad input - can be fixed by the caller
    User,
    /// System resource or environmental error - may be temporary
    System,
    /// Internal logic error - indicates a bug
    Internal,
    /// Failure reported by an external collaborator (inference engine, resource factory)
    External,
}

/// Trait for all errors in the llama session workspace
///
/// The host layer uses the category and code to translate core errors into
/// protocol-level responses without matching on every concrete enum.
pub trait LlamaError: std::error::Error + Send + Sync + Debug {
    /// Get the error category for proper handling
    fn category(&self) -> ErrorCategory;

    /// Get a unique error code for this error type
    fn error_code(&self) -> &'static str;

    /// Check if this is a caller-correctable error
    fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this error is potentially retriable
    fn is_retriable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::System | ErrorCategory::External
        )
    }

    /// Get a user-friendly error message with actionable advice
    fn user_friendly_message(&self) -> String {
        format!("{}", self)
    }

    /// Get suggested recovery actions for this error
    fn recovery_suggestions(&self) -> Vec<String> {
        match self.category() {
            ErrorCategory::User => vec![
                "Check the call sequence and input parameters".to_string(),
                "Review configuration settings".to_string(),
            ],
            ErrorCategory::System => vec![
                "Check system resources (memory, context size)".to_string(),
                "Retry the operation".to_string(),
            ],
            ErrorCategory::External => vec![
                "Check the inference engine or resource loader logs".to_string(),
                "Retry with a fresh session".to_string(),
            ],
            ErrorCategory::Internal => vec![
                "Report this as a bug".to_string(),
                "Include error details and reproduction steps".to_string(),
            ],
        }
    }
}
