use crate::cache::ReclaimPolicy;
use crate::error::ModelError;
use llama_common::ValidatedConfig;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Options that change how a model is loaded and therefore its identity in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Number of layers to offload to the GPU
    pub gpu_layers: u32,
    /// Memory-map the weights instead of reading them
    pub use_mmap: bool,
    /// Lock the weights in RAM to prevent swapping
    pub use_mlock: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            gpu_layers: u32::MAX,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

/// Cache key for a loaded model: source path plus load options
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub path: PathBuf,
    #[serde(default)]
    pub options: LoadOptions,
}

impl ModelKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: LoadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.path.as_os_str().is_empty() {
            return Err(ModelError::InvalidConfig(
                "Model path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Short hash of the key for log lines; stable only within one process
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (gpu_layers={})", self.path.display(), self.options.gpu_layers)
    }
}

/// Cache key for an adapter applied on top of a specific model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterKey {
    pub model: ModelKey,
    pub path: PathBuf,
    /// Blend scale; compared bitwise so keys stay hashable
    pub scale: f32,
}

impl AdapterKey {
    pub fn new(model: ModelKey, path: impl Into<PathBuf>, scale: f32) -> Self {
        Self {
            model,
            path: path.into(),
            scale,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        self.model.validate()?;
        if self.path.as_os_str().is_empty() {
            return Err(ModelError::InvalidConfig(
                "Adapter path cannot be empty".to_string(),
            ));
        }
        if !self.scale.is_finite() {
            return Err(ModelError::InvalidConfig(format!(
                "Adapter scale must be finite, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

impl PartialEq for AdapterKey {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.path == other.path
            && self.scale.to_bits() == other.scale.to_bits()
    }
}

impl Eq for AdapterKey {}

impl Hash for AdapterKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.model.hash(state);
        self.path.hash(state);
        self.scale.to_bits().hash(state);
    }
}

/// Configuration for the model and adapter caches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub models: ReclaimPolicy,
    #[serde(default)]
    pub adapters: ReclaimPolicy,
}

impl ValidatedConfig for CacheConfig {
    type Error = ModelError;

    fn validate(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn merge_with_defaults(self, _defaults: Self) -> Self {
        self
    }

    fn description() -> &'static str {
        "Reclamation policy for shared models and adapters"
    }
}
