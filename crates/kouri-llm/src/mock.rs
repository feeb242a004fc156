//! Mock collaborators for deterministic testing.
//!
//! Return pre-configured responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::embedding::EmbeddingProvider;
use crate::provider::*;
use crate::rerank::RelevanceScorer;
use kouri_core::{KouriError, Result};

/// A mock LLM provider that returns pre-configured responses.
///
/// # Example
/// ```
/// use kouri_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("你好");
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
    delay: Option<Duration>,
}

/// A pre-configured response from the mock provider.
#[derive(Clone, Default)]
pub struct MockResponse {
    pub text: String,
    /// If set, the provider will return this error instead.
    pub error: Option<String>,
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            error: None,
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            text: String::new(),
            error: Some(msg.to_string()),
        }
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
            delay: None,
        }
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse::text(text));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: &str) -> Self {
        self.responses.lock().push(MockResponse::error(error));
        self
    }

    /// Sleep this long inside every `complete` call (simulates a slow backend).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all requests that were made to this provider.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<LlmRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Queue a response after construction (e.g. through a shared handle).
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push(resp);
    }

    /// Pop the next queued response, or return a default "no response queued" message.
    fn next_response(&self) -> MockResponse {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            MockResponse::text("(mock: no more queued responses)")
        } else {
            responses.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = mock.error {
            return Err(KouriError::LlmProvider(error));
        }

        Ok(LlmResponse {
            text: mock.text,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            stop_reason: StopReason::EndTurn,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A mock embedder: texts listed with `with_vector` get that vector, texts listed
/// with `failing` return an error for the whole batch, everything else gets a
/// one-hot vector derived from its length.
pub struct MockEmbedding {
    dims: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Mutex::new(HashMap::new()),
            failing: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.lock().insert(text.to_string(), vector);
        self
    }

    pub fn failing(self, text: &str) -> Self {
        self.failing.lock().push(text.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let vectors = self.vectors.lock();
        let failing = self.failing.lock();
        texts
            .iter()
            .map(|t| {
                if failing.iter().any(|f| f == t) {
                    return Err(KouriError::Embedding(format!("mock failure for '{}'", t)));
                }
                if let Some(v) = vectors.get(*t) {
                    return Ok(v.clone());
                }
                if t.trim().is_empty() {
                    return Ok(vec![]);
                }
                let mut v = vec![0.0; self.dims];
                v[t.chars().count() % self.dims] = 1.0;
                Ok(v)
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock scorer returning fixed scores by document text (0.0 for unknown documents).
pub struct MockScorer {
    scores: HashMap<String, f32>,
    pub calls: AtomicUsize,
}

impl MockScorer {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_score(mut self, document: &str, score: f32) -> Self {
        self.scores.insert(document.to_string(), score);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelevanceScorer for MockScorer {
    async fn rerank(&self, _query: &str, documents: &[String]) -> Vec<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        documents
            .iter()
            .map(|d| self.scores.get(d).copied().unwrap_or(0.0))
            .collect()
    }

    fn name(&self) -> &str {
        "mock"
    }
}
