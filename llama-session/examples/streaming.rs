//! Streaming generation over a recorded script
//!
//! Loads a recorded engine script through the shared model registry, then
//! streams one generation to stdout.
//!
//! ```text
//! cargo run -p llama-session --example streaming -- [script.json] [prompt] [stop]
//! ```

use llama_common::init_tracing;
use llama_loader::{require_file, CacheConfig, ModelError, ModelKey, ModelRegistry};
use llama_session::engine::{RecordedEngine, RecordedScript, Tokenize};
use llama_session::{GenerationRequest, SessionHost, SharedModelFactory};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");

    let mut args = std::env::args().skip(1);
    let script_path = args.next().map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/chat_script.json")
    });
    let prompt_text = args.next().unwrap_or_else(|| "Hello, assistant".to_string());
    let stop = args.next();

    let registry: ModelRegistry<RecordedScript, ()> = ModelRegistry::new(&CacheConfig::default());
    let model = registry
        .load_model(ModelKey::new(script_path), |key| {
            require_file(&key.path)?;
            let content = std::fs::read_to_string(&key.path)?;
            serde_json::from_str::<RecordedScript>(&content)
                .map_err(|e| ModelError::new(e.to_string()))
        })
        .await?;

    let prompt = RecordedEngine::from_script((*model).clone()).tokenize(&prompt_text, true)?;
    info!("Prompt {:?} tokenized to {} tokens", prompt_text, prompt.len());

    let host = SessionHost::new(SharedModelFactory::new(
        Arc::clone(&model),
        |script: &RecordedScript| -> Result<RecordedEngine, ModelError> {
            Ok(RecordedEngine::from_script(script.clone()))
        },
    ));

    let mut request = GenerationRequest::new(prompt);
    if let Some(stop) = stop {
        request = request.with_stop(stop);
    }

    let mut stream = host.generate(request);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        write!(stdout, "{}", chunk.text)?;
        stdout.flush()?;
        if let Some(reason) = chunk.finish_reason {
            writeln!(stdout)?;
            info!("Finished after {} tokens: {}", chunk.token_count, reason);
        }
    }
    Ok(())
}
