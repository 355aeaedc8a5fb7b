//! Streaming driver that turns a [`GenerationRequest`] into a stream of
//! [`StreamChunk`]s.
//!
//! Each request gets a fresh engine context from a [`ContextFactory`] and
//! its own [`GenerationSession`], driven on tokio's blocking pool. Chunks are
//! delivered in order over a bounded channel. Dropping the returned stream
//! cancels the request: the next send fails, the loop ends and the session
//! with its engine context is dropped on the worker thread.

use crate::engine::{Engine, Token, Tokenize};
use crate::session::GenerationSession;
use crate::stopper::{MaxTokensStopper, StopSequenceSet, Stopper};
use crate::types::{FinishReason, GenerationRequest, HostError, StreamChunk};
use llama_loader::ModelError;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

mod utf8;

pub use utf8::Utf8Accumulator;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Creates a fresh engine context per request.
pub trait ContextFactory: Send + Sync + 'static {
    type Engine: Engine + Tokenize + Send + 'static;

    fn create_context(&self) -> Result<Self::Engine, ModelError>;
}

impl<F, E> ContextFactory for F
where
    F: Fn() -> Result<E, ModelError> + Send + Sync + 'static,
    E: Engine + Tokenize + Send + 'static,
{
    type Engine = E;

    fn create_context(&self) -> Result<E, ModelError> {
        self()
    }
}

/// Context factory over a model shared through the loader's cache.
///
/// Every request builds a new context from the same `Arc`'d weights, so
/// concurrent requests share the model but never a context.
pub struct SharedModelFactory<M, F> {
    model: Arc<M>,
    create: F,
}

impl<M, F> SharedModelFactory<M, F> {
    pub fn new(model: Arc<M>, create: F) -> Self {
        Self { model, create }
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }
}

impl<M, F, E> ContextFactory for SharedModelFactory<M, F>
where
    M: Send + Sync + 'static,
    F: Fn(&M) -> Result<E, ModelError> + Send + Sync + 'static,
    E: Engine + Tokenize + Send + 'static,
{
    type Engine = E;

    fn create_context(&self) -> Result<E, ModelError> {
        (self.create)(&self.model)
    }
}

/// Thin request driver used by protocol layers.
pub struct SessionHost<F: ContextFactory> {
    factory: Arc<F>,
    channel_capacity: usize,
}

impl<F: ContextFactory> SessionHost<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Bound on chunks buffered ahead of a slow consumer.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Start a generation and return its chunk stream.
    ///
    /// Must be called from within a tokio runtime. Errors arrive as the last
    /// item of the stream.
    pub fn generate(
        &self,
        request: GenerationRequest,
    ) -> ReceiverStream<Result<StreamChunk, HostError>> {
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        let factory = Arc::clone(&self.factory);

        tokio::task::spawn_blocking(move || {
            if let Err(e) = run_generation(factory.as_ref(), request, &sender) {
                warn!("Generation failed: {}", e);
                let _ = sender.blocking_send(Err(e));
            }
        });

        ReceiverStream::new(receiver)
    }
}

/// Outcome of pushing one chunk to the consumer.
enum Delivery {
    Sent,
    Cancelled,
}

fn send(
    sender: &mpsc::Sender<Result<StreamChunk, HostError>>,
    chunk: StreamChunk,
) -> Delivery {
    match sender.blocking_send(Ok(chunk)) {
        Ok(()) => Delivery::Sent,
        Err(_) => Delivery::Cancelled,
    }
}

fn run_generation<F: ContextFactory>(
    factory: &F,
    request: GenerationRequest,
    sender: &mpsc::Sender<Result<StreamChunk, HostError>>,
) -> Result<(), HostError> {
    let start_time = Instant::now();
    let mut stops = StopSequenceSet::from_patterns(request.stop.iter().cloned())?;
    let mut budget = MaxTokensStopper::new(request.max_tokens);

    let engine = factory.create_context()?;
    let mut session = GenerationSession::new(engine, request.session.clone())?;
    session.set_initial_prompt(&request.prompt)?;
    let session_id = session.session_id();
    debug!(
        "Session {}: streaming up to {} tokens with {} stop sequences",
        session_id,
        request.max_tokens,
        stops.len()
    );

    let mut text = Utf8Accumulator::new();
    let mut withheld = String::new();
    let mut token_count = 0usize;

    let reason = loop {
        if budget.is_limit_reached() {
            break FinishReason::MaxTokens;
        }

        let token: Token = session.get_token()?;
        if token.is_invalid() {
            break FinishReason::EndOfSequence;
        }
        token_count += 1;

        let piece = text.push(&session.engine().token_to_piece(token)?);
        withheld.push_str(&piece);

        if let Some(FinishReason::StopSequence(pattern)) = stops.observe(token, &piece) {
            // everything from the stop string onwards is dropped
            if let Some(idx) = withheld.find(&pattern) {
                withheld.truncate(idx);
            }
            if !withheld.is_empty() {
                if let Delivery::Cancelled =
                    send(sender, StreamChunk::text(std::mem::take(&mut withheld), token_count))
                {
                    info!("Session {}: stream receiver dropped, cancelling", session_id);
                    return Ok(());
                }
            }
            break FinishReason::StopSequence(pattern);
        }

        if !stops.has_running_matches() && !withheld.is_empty() {
            if let Delivery::Cancelled =
                send(sender, StreamChunk::text(std::mem::take(&mut withheld), token_count))
            {
                info!("Session {}: stream receiver dropped, cancelling", session_id);
                return Ok(());
            }
        }

        if let Some(reason) = budget.observe(token, &piece) {
            break reason;
        }
    };

    if !matches!(reason, FinishReason::StopSequence(_)) {
        withheld.push_str(&text.finish());
        if !withheld.is_empty() {
            if let Delivery::Cancelled = send(sender, StreamChunk::text(withheld, token_count)) {
                info!("Session {}: stream receiver dropped, cancelling", session_id);
                return Ok(());
            }
        }
    }

    info!(
        "Session {}: completed streaming generation in {:?} ({} tokens, reason: {})",
        session_id,
        start_time.elapsed(),
        token_count,
        reason
    );
    let _ = send(sender, StreamChunk::finished(reason, token_count));
    Ok(())
}
