use llama_loader::{
    require_file, AdapterKey, CacheConfig, LoadOptions, ModelError, ModelKey, ModelRegistry,
    ReclaimPolicy,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing_test::traced_test;

/// Stand-in for loaded weights: the file contents plus the options used.
#[derive(Debug)]
struct FakeWeights {
    bytes: u64,
    options: LoadOptions,
}

#[derive(Debug)]
struct FakeAdapter {
    scale: f32,
    base_bytes: u64,
}

/// Create a test GGUF file with some content
async fn create_test_gguf_file(path: &PathBuf, content: &[u8]) -> Result<(), std::io::Error> {
    let mut file = File::create(path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    Ok(())
}

fn counting_loader(
    calls: Arc<AtomicUsize>,
) -> impl FnOnce(&ModelKey) -> Result<FakeWeights, ModelError> + Send + 'static {
    move |key: &ModelKey| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(25));
        let bytes = require_file(&key.path)?;
        Ok(FakeWeights {
            bytes,
            options: key.options.clone(),
        })
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_model() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("model.gguf");
    create_test_gguf_file(&path, b"test gguf content").await.unwrap();

    let registry: Arc<ModelRegistry<FakeWeights, FakeAdapter>> =
        Arc::new(ModelRegistry::new(&CacheConfig::default()));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            let key = ModelKey::new(path.clone());
            tokio::spawn(async move { registry.load_model(key, counting_loader(calls)).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(handles[0].bytes, 17);
    assert_eq!(registry.models().live_handles(&ModelKey::new(path)), 8);
}

#[tokio::test]
async fn test_load_options_are_part_of_identity() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("model.gguf");
    create_test_gguf_file(&path, b"weights").await.unwrap();

    let registry: ModelRegistry<FakeWeights, FakeAdapter> =
        ModelRegistry::new(&CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let gpu = registry
        .load_model(ModelKey::new(path.clone()), counting_loader(calls.clone()))
        .await
        .unwrap();
    let cpu = registry
        .load_model(
            ModelKey::new(path).with_options(LoadOptions {
                gpu_layers: 0,
                ..LoadOptions::default()
            }),
            counting_loader(calls.clone()),
        )
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&gpu, &cpu));
    assert_eq!(cpu.options.gpu_layers, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_model_surfaces_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let registry: ModelRegistry<FakeWeights, FakeAdapter> =
        ModelRegistry::new(&CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let err = registry
        .load_model(
            ModelKey::new(temp_dir.path().join("nonexistent.gguf")),
            counting_loader(calls.clone()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ModelError::NotFound(_)));
    assert!(registry.models().is_empty());
    assert_eq!(registry.models().stats().failures, 1);
}

#[traced_test]
#[test]
fn test_blocking_load_logs_construction() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("model.gguf");
    std::fs::write(&path, b"weights").unwrap();

    let registry: ModelRegistry<FakeWeights, FakeAdapter> =
        ModelRegistry::new(&CacheConfig::default());
    let key = ModelKey::new(path);
    let calls = Arc::new(AtomicUsize::new(0));

    registry
        .load_model_blocking(&key, counting_loader(calls.clone()))
        .unwrap();
    registry
        .load_model_blocking(&key, counting_loader(calls.clone()))
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(logs_contain("Constructed resource"));
    assert!(logs_contain("Resource cache hit"));
}

#[tokio::test]
async fn test_adapter_reuses_model_and_is_cached() {
    let temp_dir = TempDir::new().unwrap();
    let model_path = temp_dir.path().join("model.gguf");
    let lora_path = temp_dir.path().join("chat-lora.bin");
    create_test_gguf_file(&model_path, b"base weights").await.unwrap();
    create_test_gguf_file(&lora_path, b"lora").await.unwrap();

    let registry: ModelRegistry<FakeWeights, FakeAdapter> =
        ModelRegistry::new(&CacheConfig::default());
    let model_key = ModelKey::new(model_path);
    let model = registry
        .load_model(model_key.clone(), counting_loader(Arc::new(AtomicUsize::new(0))))
        .await
        .unwrap();

    let adapter_calls = Arc::new(AtomicUsize::new(0));
    let load_adapter = |calls: Arc<AtomicUsize>| {
        move |key: &AdapterKey, base: &FakeWeights| -> Result<FakeAdapter, ModelError> {
            calls.fetch_add(1, Ordering::SeqCst);
            require_file(&key.path)?;
            Ok(FakeAdapter {
                scale: key.scale,
                base_bytes: base.bytes,
            })
        }
    };

    let key = AdapterKey::new(model_key.clone(), lora_path.clone(), 0.75);
    let first = registry
        .load_adapter(key.clone(), model.clone(), load_adapter(adapter_calls.clone()))
        .await
        .unwrap();
    let second = registry
        .load_adapter(key, model.clone(), load_adapter(adapter_calls.clone()))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.scale, 0.75);
    assert_eq!(first.base_bytes, 12);
    assert_eq!(adapter_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_purge_reclaims_only_unused_resources() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.gguf");
    let b = temp_dir.path().join("b.gguf");
    create_test_gguf_file(&a, b"a").await.unwrap();
    create_test_gguf_file(&b, b"b").await.unwrap();

    let registry: ModelRegistry<FakeWeights, FakeAdapter> =
        ModelRegistry::new(&CacheConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let kept = registry
        .load_model(ModelKey::new(a.clone()), counting_loader(calls.clone()))
        .await
        .unwrap();
    let dropped = registry
        .load_model(ModelKey::new(b.clone()), counting_loader(calls.clone()))
        .await
        .unwrap();
    drop(dropped);

    assert_eq!(registry.purge_unused(), 1);
    assert!(registry.models().contains(&ModelKey::new(a)));
    assert!(!registry.models().contains(&ModelKey::new(b.clone())));

    // A purged key is rebuilt, never handed out stale.
    let rebuilt = registry
        .load_model(ModelKey::new(b), counting_loader(calls.clone()))
        .await
        .unwrap();
    assert_eq!(rebuilt.bytes, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    drop(kept);
}

#[tokio::test]
async fn test_eager_policy_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("model.gguf");
    create_test_gguf_file(&path, b"weights").await.unwrap();

    let config = CacheConfig {
        models: ReclaimPolicy::Eager,
        adapters: ReclaimPolicy::Eager,
    };
    let registry: ModelRegistry<FakeWeights, FakeAdapter> = ModelRegistry::new(&config);
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = registry
        .load_model(ModelKey::new(path.clone()), counting_loader(calls.clone()))
        .await
        .unwrap();
    drop(handle);
    assert!(registry.models().is_empty());

    registry
        .load_model(ModelKey::new(path), counting_loader(calls.clone()))
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
