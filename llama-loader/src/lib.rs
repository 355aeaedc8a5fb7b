//! # Llama Loader
//!
//! Shared resource loading for the llama session ecosystem. Loaded models and
//! adapters are expensive to construct, so they are kept in a keyed,
//! reference-counted [`ResourceCache`] that guarantees at most one
//! construction per key, even when many sessions ask for the same model at
//! once.

pub mod cache;
pub mod error;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use cache::{CacheStats, ReclaimPolicy, ResourceCache};
pub use error::ModelError;
pub use registry::{require_file, ModelRegistry};
pub use types::{AdapterKey, CacheConfig, LoadOptions, ModelKey};
