//! Agent port - the contract every agent backend adapter implements.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{FutureExt, Stream};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentCapabilities, AgentConfig, AgentContext, AgentResponse, AgentStreamChunk, AgentType,
    HealthStatus,
};

/// Buffer size of the chunk channel between producer and consumer.
pub const STREAM_BUFFER: usize = 32;

/// Identity and scheduling attributes of an agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub enabled: bool,
    pub priority: i64,
}

impl AgentDescriptor {
    pub fn from_config(config: &AgentConfig, agent_type: AgentType) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            name: config.name.clone(),
            agent_type,
            enabled: config.enabled,
            priority: config.priority,
        }
    }
}

/// Uniform interface over heterogeneous agent backends.
///
/// `execute`, `execute_streaming` and `health_check` never fail: backend
/// errors are reported inside the returned value.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity of this instance.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Run the query to completion.
    async fn execute(&self, query: &str, context: &AgentContext) -> AgentResponse;

    /// Run the query, yielding incremental chunks.
    ///
    /// The returned stream ends with exactly one completion or error chunk.
    fn execute_streaming(&self, query: &str, context: &AgentContext) -> AgentStream;

    /// Capability snapshot. Pure.
    fn capabilities(&self) -> AgentCapabilities;

    /// Live probe of the backend.
    async fn health_check(&self) -> HealthStatus;

    /// Prepare backend resources before first use.
    async fn initialize(&self) -> DomainResult<()> {
        Ok(())
    }

    /// Release backend resources.
    async fn cleanup(&self) {}

    fn validate_query(&self, query: &str) -> bool {
        !query.trim().is_empty()
    }

    fn metadata(&self) -> Map<String, Value> {
        let descriptor = self.descriptor();
        let capabilities = serde_json::to_value(self.capabilities()).unwrap_or(Value::Null);
        let mut metadata = Map::new();
        metadata.insert("agent_id".into(), json!(descriptor.agent_id));
        metadata.insert("name".into(), json!(descriptor.name));
        metadata.insert("type".into(), json!(descriptor.agent_type.as_str()));
        metadata.insert("enabled".into(), json!(descriptor.enabled));
        metadata.insert("priority".into(), json!(descriptor.priority));
        metadata.insert("capabilities".into(), capabilities);
        metadata
    }
}

/// Builds agent instances from a merged configuration.
pub type AgentConstructor =
    Arc<dyn Fn(&AgentConfig) -> DomainResult<Arc<dyn Agent>> + Send + Sync>;

/// What the registry stores per agent id: the adapter type, its capability
/// snapshot, and a way to construct instances.
#[derive(Clone)]
pub struct AgentBlueprint {
    pub agent_type: AgentType,
    pub capabilities: AgentCapabilities,
    construct: AgentConstructor,
}

impl AgentBlueprint {
    pub fn new<F>(agent_type: AgentType, capabilities: AgentCapabilities, construct: F) -> Self
    where
        F: Fn(&AgentConfig) -> DomainResult<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        Self {
            agent_type,
            capabilities,
            construct: Arc::new(construct),
        }
    }

    /// Construct a fresh instance.
    pub fn construct(&self, config: &AgentConfig) -> DomainResult<Arc<dyn Agent>> {
        (self.construct)(config)
    }
}

impl std::fmt::Debug for AgentBlueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBlueprint")
            .field("agent_type", &self.agent_type)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Producer half of an agent stream.
///
/// Cheap to clone. Once a terminal chunk has been sent every further send is
/// refused, so a stream carries at most one terminal chunk.
#[derive(Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<AgentStreamChunk>,
    terminated: Arc<AtomicBool>,
}

impl ChunkSink {
    /// Send a chunk. Returns `false` when the consumer is gone or the
    /// stream already terminated; producers should stop working then.
    pub async fn emit(&self, chunk: AgentStreamChunk) -> bool {
        if chunk.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                return false;
            }
        } else if self.terminated.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(chunk).await.is_ok()
    }

    /// Send the completion chunk unless the stream already terminated.
    pub async fn complete(&self) -> bool {
        self.emit(AgentStreamChunk::completion()).await
    }

    /// Send an error chunk unless the stream already terminated.
    pub async fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(AgentStreamChunk::error(message)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped the stream.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

type BoxedProducer = Pin<Box<dyn Future<Output = DomainResult<()>> + Send>>;

/// Consumer half of an agent stream.
///
/// Yields chunks in production order and stops after the first terminal chunk.
pub struct AgentStream {
    rx: mpsc::Receiver<AgentStreamChunk>,
    finished: bool,
}

impl AgentStream {
    /// Create a connected sink/stream pair.
    pub fn channel() -> (ChunkSink, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let sink = ChunkSink {
            tx,
            terminated: Arc::new(AtomicBool::new(false)),
        };
        (
            sink,
            Self {
                rx,
                finished: false,
            },
        )
    }

    /// Spawn `producer` on the runtime and return the consuming end.
    ///
    /// `Ok` from the producer appends a completion chunk, `Err` or a panic
    /// appends an error chunk; both are skipped if the producer already
    /// terminated the stream itself.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(ChunkSink) -> Fut,
        Fut: Future<Output = DomainResult<()>> + Send + 'static,
    {
        let (sink, stream) = Self::channel();
        let fut: BoxedProducer = Box::pin(producer(sink.clone()));

        tokio::spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {
                    sink.complete().await;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "agent stream producer failed");
                    sink.fail(e.to_string()).await;
                }
                Err(_) => {
                    tracing::error!("agent stream producer panicked");
                    sink.fail("stream producer panicked").await;
                }
            }
        });

        stream
    }

    /// Stream consisting of a single error chunk.
    pub fn failed(message: impl Into<String>) -> Self {
        let (sink, stream) = Self::channel();
        // Fresh channel with free capacity; try_send cannot be refused here.
        let _ = sink.tx.try_send(AgentStreamChunk::error(message));
        stream
    }

    /// Receive the next chunk, or `None` once the stream is over.
    pub async fn next_chunk(&mut self) -> Option<AgentStreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = self.rx.recv().await;
        self.observe(chunk)
    }

    /// Drain the stream.
    pub async fn collect_chunks(mut self) -> Vec<AgentStreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    fn observe(&mut self, chunk: Option<AgentStreamChunk>) -> Option<AgentStreamChunk> {
        match chunk {
            Some(chunk) => {
                if chunk.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Some(chunk)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

impl Stream for AgentStream {
    type Item = AgentStreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(chunk) => Poll::Ready(this.observe(chunk)),
            Poll::Pending => Poll::Pending,
        }
    }
}
