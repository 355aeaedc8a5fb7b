use llama_common::error::{ErrorCategory, LlamaError};
use thiserror::Error;

/// Errors that can occur while obtaining a shared model or adapter
#[derive(Debug, Error)]
pub enum ModelError {
    /// The resource factory ran and reported failure
    #[error("Resource construction failed: {0}\n🔧 Check available memory and verify the model file integrity")]
    ConstructionFailed(String),

    /// Model or adapter not found at the specified location
    #[error("Resource not found: {0}\n📁 Verify the file path is correct, the file exists and is readable")]
    NotFound(String),

    /// Invalid key or cache configuration
    #[error("Invalid resource config: {0}\n⚙️ Ensure the path is non-empty and adapter scale is finite")]
    InvalidConfig(String),

    /// I/O error during file operations
    #[error("I/O error: {0}\n💾 Check file permissions and storage availability")]
    Io(#[from] std::io::Error),

    /// The blocking construction task panicked or was cancelled
    #[error("Construction task failed: {0}")]
    Join(String),
}

impl ModelError {
    /// Create a new ModelError from a string message
    pub fn new(message: impl Into<String>) -> Self {
        Self::ConstructionFailed(message.into())
    }
}

impl LlamaError for ModelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ModelError::ConstructionFailed(_) => ErrorCategory::External,
            ModelError::NotFound(_) => ErrorCategory::User,
            ModelError::InvalidConfig(_) => ErrorCategory::User,
            ModelError::Io(_) => ErrorCategory::System,
            ModelError::Join(_) => ErrorCategory::Internal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ModelError::ConstructionFailed(_) => "MODEL_CONSTRUCTION_FAILED",
            ModelError::NotFound(_) => "MODEL_NOT_FOUND",
            ModelError::InvalidConfig(_) => "MODEL_INVALID_CONFIG",
            ModelError::Io(_) => "MODEL_IO_ERROR",
            ModelError::Join(_) => "MODEL_JOIN_ERROR",
        }
    }
}

impl From<tokio::task::JoinError> for ModelError {
    fn from(err: tokio::task::JoinError) -> Self {
        ModelError::Join(err.to_string())
    }
}
