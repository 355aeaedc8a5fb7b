use crate::cache::{CacheStats, ResourceCache};
use crate::error::ModelError;
use crate::types::{AdapterKey, CacheConfig, ModelKey};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Typed front door to the model and adapter caches.
///
/// The payload types are whatever the inference engine uses for loaded
/// weights (`M`) and adapters (`A`); the registry only guarantees that each
/// distinct key is built once and shared.
pub struct ModelRegistry<M, A> {
    models: Arc<ResourceCache<ModelKey, M>>,
    adapters: Arc<ResourceCache<AdapterKey, A>>,
}

impl<M, A> ModelRegistry<M, A>
where
    M: Send + Sync + 'static,
    A: Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        debug!("Creating model registry with {}", llama_common::Pretty(config));
        Self {
            models: Arc::new(ResourceCache::new(config.models)),
            adapters: Arc::new(ResourceCache::new(config.adapters)),
        }
    }

    /// Load (or reuse) the model for `key`.
    ///
    /// The loader runs on tokio's blocking pool so a multi-gigabyte load does
    /// not stall the runtime.
    pub async fn load_model<F>(&self, key: ModelKey, loader: F) -> Result<Arc<M>, ModelError>
    where
        F: FnOnce(&ModelKey) -> Result<M, ModelError> + Send + 'static,
    {
        key.validate()?;
        let cache = Arc::clone(&self.models);
        info!("Requesting model {} [{}]", key, key.fingerprint());
        tokio::task::spawn_blocking(move || cache.get_or_create(&key, loader)).await?
    }

    /// Blocking variant of [`ModelRegistry::load_model`] for callers already
    /// off the async runtime.
    pub fn load_model_blocking<F>(&self, key: &ModelKey, loader: F) -> Result<Arc<M>, ModelError>
    where
        F: FnOnce(&ModelKey) -> Result<M, ModelError>,
    {
        key.validate()?;
        self.models.get_or_create(key, loader)
    }

    /// Load (or reuse) an adapter built on top of `model`.
    pub async fn load_adapter<F>(
        &self,
        key: AdapterKey,
        model: Arc<M>,
        loader: F,
    ) -> Result<Arc<A>, ModelError>
    where
        F: FnOnce(&AdapterKey, &M) -> Result<A, ModelError> + Send + 'static,
    {
        key.validate()?;
        let cache = Arc::clone(&self.adapters);
        info!(
            "Requesting adapter {} (scale {}) for {}",
            key.path.display(),
            key.scale,
            key.model
        );
        tokio::task::spawn_blocking(move || {
            cache.get_or_create(&key, |adapter_key| loader(adapter_key, &model))
        })
        .await?
    }

    pub fn models(&self) -> &ResourceCache<ModelKey, M> {
        &self.models
    }

    pub fn adapters(&self) -> &ResourceCache<AdapterKey, A> {
        &self.adapters
    }

    /// Reclaim models and adapters no session holds. Adapters go first so
    /// models they reference become unused in the same pass.
    pub fn purge_unused(&self) -> usize {
        let adapters = self.adapters.purge_unused();
        let models = self.models.purge_unused();
        if adapters + models > 0 {
            info!("Purged {} adapters and {} models", adapters, models);
        }
        adapters + models
    }

    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.models.stats(), self.adapters.stats())
    }
}

/// Check that a resource file exists and return its size in bytes.
///
/// Loaders call this first so a bad path surfaces as `NotFound` rather than
/// an opaque engine failure.
pub fn require_file(path: &Path) -> Result<u64, ModelError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(ModelError::NotFound(format!(
            "{} is not a regular file",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ModelError::NotFound(format!(
            "Model file does not exist: {}",
            path.display()
        ))),
        Err(e) => Err(ModelError::Io(e)),
    }
}
