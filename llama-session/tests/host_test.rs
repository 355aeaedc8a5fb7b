use llama_loader::{require_file, CacheConfig, ModelError, ModelKey, ModelRegistry};
use llama_session::engine::{RecordedEngine, RecordedScript, Token, Tokenize};
use llama_session::{
    FinishReason, GenerationRequest, HostError, SessionHost, SharedModelFactory, StreamChunk,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::StreamExt;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load_script(key: &ModelKey) -> Result<RecordedScript, ModelError> {
    require_file(&key.path)?;
    let content = std::fs::read_to_string(&key.path)?;
    serde_json::from_str(&content).map_err(|e| ModelError::new(e.to_string()))
}

async fn collect(
    stream: impl tokio_stream::Stream<Item = Result<StreamChunk, HostError>>,
) -> (String, StreamChunk) {
    let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;
    let (last, text) = chunks.split_last().unwrap();
    assert!(last.is_complete);
    assert!(text.iter().all(|c| !c.is_complete && !c.text.is_empty()));
    (text.iter().map(|c| c.text.as_str()).collect(), last.clone())
}

#[test_log::test(tokio::test)]
async fn test_shared_model_serves_independent_contexts() {
    let registry: ModelRegistry<RecordedScript, ()> = ModelRegistry::new(&CacheConfig::default());
    let key = ModelKey::new(fixture_path("chat_script.json"));
    let model = registry.load_model(key.clone(), |k| load_script(k)).await.unwrap();
    let again = registry.load_model(key, |k| load_script(k)).await.unwrap();
    assert!(Arc::ptr_eq(&model, &again));
    assert_eq!(registry.stats().0.misses, 1);

    let prompt = RecordedEngine::from_script((*model).clone())
        .tokenize("Hello, assistant", true)
        .unwrap();
    assert_eq!(prompt, vec![Token(1), Token(10), Token(11), Token(12)]);

    let host = SessionHost::new(SharedModelFactory::new(
        Arc::clone(&model),
        |script: &RecordedScript| -> Result<RecordedEngine, ModelError> {
            Ok(RecordedEngine::from_script(script.clone()))
        },
    ));

    let first = host.generate(GenerationRequest::new(prompt.clone()));
    let second = host.generate(GenerationRequest::new(prompt));
    let ((text_a, last_a), (text_b, last_b)) = tokio::join!(collect(first), collect(second));

    assert_eq!(text_a, "Hi there!\nUser: more");
    assert_eq!(text_a, text_b);
    assert_eq!(last_a, StreamChunk::finished(FinishReason::EndOfSequence, 6));
    assert_eq!(last_a, last_b);
}

#[tokio::test]
async fn test_missing_script_surfaces_as_not_found() {
    let registry: ModelRegistry<RecordedScript, ()> = ModelRegistry::new(&CacheConfig::default());
    let err = registry
        .load_model(ModelKey::new(fixture_path("absent.json")), |k| load_script(k))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::NotFound(_)));
}

#[tokio::test]
async fn test_stop_sequence_text_is_never_emitted() {
    let script: RecordedScript =
        serde_json::from_str(&std::fs::read_to_string(fixture_path("chat_script.json")).unwrap())
            .unwrap();
    let host = SessionHost::new(move || -> Result<RecordedEngine, ModelError> {
        Ok(RecordedEngine::from_script(script.clone()))
    });

    let (text, last) = collect(
        host.generate(GenerationRequest::new(vec![Token(1)]).with_stop("\nUser:")),
    )
    .await;

    assert_eq!(text, "Hi there!");
    assert_eq!(
        last,
        StreamChunk::finished(FinishReason::StopSequence("\nUser:".to_string()), 5)
    );
}

#[tokio::test]
async fn test_false_start_is_released_with_following_text() {
    let host = SessionHost::new(|| -> Result<RecordedEngine, ModelError> {
        Ok(RecordedEngine::new(64, 8)
            .with_end_of_generation(Token(2))
            .with_piece(Token(10), "a ")
            .with_piece(Token(11), "EN")
            .with_piece(Token(12), "ter")
            .with_samples([Token(10), Token(11), Token(12), Token(2)]))
    });

    let chunks: Vec<StreamChunk> = host
        .generate(GenerationRequest::new(vec![Token(1)]).with_stop("END"))
        .map(|c| c.unwrap())
        .collect()
        .await;

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["a ", "ENter", ""]);
    assert_eq!(chunks[1].token_count, 3);
    assert_eq!(chunks[2].finish_reason, Some(FinishReason::EndOfSequence));
}

#[tokio::test]
async fn test_split_utf8_piece_is_reassembled() {
    let euro = "€".as_bytes().to_vec();
    let host = SessionHost::new(move || -> Result<RecordedEngine, ModelError> {
        Ok(RecordedEngine::new(64, 8)
            .with_end_of_generation(Token(2))
            .with_piece_bytes(Token(20), euro[..2].to_vec())
            .with_piece_bytes(Token(21), vec![euro[2], b'5'])
            .with_samples([Token(20), Token(21), Token(2)]))
    });

    let (text, last) = collect(host.generate(GenerationRequest::new(vec![Token(1)]))).await;
    assert_eq!(text, "€5");
    assert_eq!(last.token_count, 2);
}

#[tokio::test]
async fn test_budget_caps_long_generation() {
    let host = SessionHost::new(|| -> Result<RecordedEngine, ModelError> {
        Ok(RecordedEngine::new(32, 4)
            .with_piece(Token(10), "x")
            .with_samples(std::iter::repeat(Token(10)).take(500)))
    });

    let (text, last) = collect(
        host.generate(GenerationRequest::new(vec![Token(1), Token(2)]).with_max_tokens(100)),
    )
    .await;
    assert_eq!(text, "x".repeat(100));
    assert_eq!(last, StreamChunk::finished(FinishReason::MaxTokens, 100));
}

#[tokio::test]
async fn test_engine_failure_ends_stream_with_error() {
    let host = SessionHost::new(|| -> Result<RecordedEngine, ModelError> {
        Ok(RecordedEngine::new(64, 8)
            .with_piece(Token(10), "x")
            .with_samples([Token(10), Token(10), Token(10)])
            .fail_decode_at(2))
    });

    let items: Vec<_> = host
        .generate(GenerationRequest::new(vec![Token(1)]))
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().text, "x");
    assert!(matches!(
        items[1],
        Err(HostError::Session(llama_session::SessionError::EngineFailure(_)))
    ));
}

#[tokio::test]
async fn test_dropping_the_stream_cancels_generation() {
    let journal = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&journal);
    let host = SessionHost::new(move || -> Result<RecordedEngine, ModelError> {
        let engine = RecordedEngine::new(64, 8)
            .with_piece(Token(10), "x")
            .with_samples(std::iter::repeat(Token(10)).take(5000));
        *slot.lock().unwrap() = Some(engine.journal());
        Ok(engine)
    })
    .with_channel_capacity(1);

    let mut stream = host.generate(GenerationRequest::new(vec![Token(1)]).with_max_tokens(10_000));
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.text, "x");
    drop(stream);

    let journal = journal.lock().unwrap().clone().unwrap();
    let mut previous = journal.decode_count();
    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let current = journal.decode_count();
        if current == previous {
            break;
        }
        previous = current;
    }
    assert!(previous < 100, "generation kept running: {} decodes", previous);
}
