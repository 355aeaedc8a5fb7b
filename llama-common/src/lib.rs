//! # Llama Common
//!
//! Shared types, traits, and utilities for the llama session workspace.
//! This crate provides common abstractions to ensure consistency across
//! the loader and session crates: categorised errors, validated
//! configuration, and logging helpers.

pub mod config;
pub mod error;
pub mod logging;

// Re-export main traits for convenience
pub use config::{ConfigError, ValidatedConfig};
pub use error::{ErrorCategory, LlamaError};
pub use logging::{init_tracing, Pretty};
