#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use rag_gateway::breaker::CircuitBreaker;
use rag_gateway::config::{BreakerConfig, ChunkingConfig};
use rag_gateway::embedding::EmbeddingIndexer;
use rag_gateway::error::GatewayError;
use rag_gateway::gateway::Gateway;
use rag_gateway::lifecycle::{DocumentLibrary, DocumentProcessor};
use rag_gateway::models::ChatMessage;
use rag_gateway::provider::Transport;
use rag_gateway::resilience::RetryPolicy;
use rag_gateway::storage::FileStorage;
use rag_gateway::store::Store;

pub const DIMS: usize = 3;

type Embedder = dyn Fn(&str) -> Result<Vec<f32>, GatewayError> + Send + Sync;

/// In-process transport with scripted chat replies and a pluggable
/// embedding function. Records every request it receives.
pub struct ScriptedTransport {
    chat_replies: Mutex<VecDeque<Result<Value, GatewayError>>>,
    embedder: Box<Embedder>,
    delay: Duration,
    pub chat_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
    pub chat_requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    pub embed_inputs: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_embedder(|text| Ok(keyword_vector(text)))
    }

    pub fn with_embedder<F>(embedder: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<f32>, GatewayError> + Send + Sync + 'static,
    {
        Self {
            chat_replies: Mutex::new(VecDeque::new()),
            embedder: Box::new(embedder),
            delay: Duration::ZERO,
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            chat_requests: Mutex::new(Vec::new()),
            embed_inputs: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every request before replying.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a chat reply. Once the queue is empty every chat succeeds
    /// with `"ok"`.
    pub fn push_chat(&self, reply: Result<Value, GatewayError>) {
        self.chat_replies.lock().push_back(reply);
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn last_chat(&self) -> (String, Vec<ChatMessage>) {
        self.chat_requests
            .lock()
            .last()
            .cloned()
            .expect("no chat request recorded")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Value, GatewayError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.chat_requests
            .lock()
            .push((model.to_string(), messages.to_vec()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.chat_replies.lock().pop_front();
        reply.unwrap_or_else(|| Ok(chat_body(model, "ok")))
    }

    async fn generate_embeddings(&self, model: &str, input: &str) -> Result<Value, GatewayError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.embed_inputs.lock().push(input.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let vector = (self.embedder)(input)?;
        Ok(json!({
            "model": model,
            "data": [{ "embedding": vector }],
            "usage": { "total_tokens": 4 }
        }))
    }
}

pub fn chat_body(model: &str, content: &str) -> Value {
    json!({
        "model": model,
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

/// Three-dimensional topic vector: refunds, shipping, careers.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let score = |word: &str| if lower.contains(word) { 1.0 } else { 0.0 };
    let v = vec![score("refund"), score("shipping"), score("career")];
    if v.iter().all(|x| *x == 0.0) {
        vec![0.1, 0.1, 0.1]
    } else {
        v
    }
}

pub fn gateway_with(
    transport: Arc<ScriptedTransport>,
    failure_threshold: u32,
    reset_timeout_ms: u64,
    max_attempts: u32,
    timeout: Duration,
) -> Arc<Gateway> {
    let breaker = Arc::new(CircuitBreaker::new(
        "scripted",
        &BreakerConfig {
            failure_threshold,
            reset_timeout_ms,
        },
    ));
    let retry = RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        jitter: false,
    };
    Arc::new(Gateway::new(transport, breaker, retry, timeout))
}

/// Gateway with a lenient breaker and one attempt per call.
pub fn simple_gateway(transport: Arc<ScriptedTransport>) -> Arc<Gateway> {
    gateway_with(transport, 100, 30_000, 1, Duration::from_secs(5))
}

/// Store, file storage, library, and processor wired together over a
/// temporary storage root.
pub struct Pipeline {
    pub tmp: TempDir,
    pub store: Arc<dyn Store>,
    pub files: FileStorage,
    pub library: DocumentLibrary,
    pub processor: DocumentProcessor,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<Gateway>, tmp: TempDir) -> Self {
        let files = FileStorage::new(tmp.path().join("files"));
        let indexer = EmbeddingIndexer::new(gateway, "embed-model", DIMS);
        let chunking = ChunkingConfig {
            max_tokens: 20,
            overlap_tokens: 0,
        };
        Self {
            library: DocumentLibrary::new(store.clone(), files.clone()),
            processor: DocumentProcessor::new(store.clone(), files.clone(), indexer, chunking),
            store,
            files,
            tmp,
        }
    }

    /// Write `content` to a source file named `name` and upload it.
    pub async fn upload(&self, tenant_id: i64, name: &str, content: &str) -> String {
        let source = self.source_path(name);
        std::fs::write(&source, content).unwrap();
        self.library
            .upload(tenant_id, 7, &source, None)
            .await
            .unwrap()
            .id
    }

    /// Overwrite the stored copy of a document's file.
    pub fn rewrite_stored(&self, file_ref: &str, content: &str) {
        std::fs::write(self.files.root().join(file_ref), content).unwrap();
    }

    fn source_path(&self, name: &str) -> PathBuf {
        let dir = self.tmp.path().join("src");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }
}

pub fn paragraphs(topics: &[&str]) -> String {
    topics
        .iter()
        .map(|t| format!("This paragraph is all about {t} and nothing else at all."))
        .collect::<Vec<_>>()
        .join("\n\n")
}
