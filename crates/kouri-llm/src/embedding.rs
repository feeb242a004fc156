use async_trait::async_trait;
use kouri_core::{KouriError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for turning text into fixed-length vectors.
///
/// Implementations return exactly one vector per input text, in order.
/// Blank texts map to an empty vector so callers can drop them before indexing.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the output embeddings (best known value for remote models).
    fn dimensions(&self) -> usize;

    /// Provider name.
    fn name(&self) -> &str;
}

// ── Local ──────────────────────────────────────────────────────

/// Deterministic in-process embedder.
///
/// Character unigrams and bigrams are feature-hashed into `dims` buckets with a
/// signed blake3 hash, then L2-normalized. Works for CJK text without a tokenizer
/// and never touches the network.
pub struct LocalEmbedding {
    dims: usize,
}

impl LocalEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().filter(|c| !c.is_whitespace()).collect();
        if chars.is_empty() {
            return vec![];
        }

        let mut vector = vec![0.0f32; self.dims];
        let mut buf = [0u8; 8];
        for c in &chars {
            self.bump(&mut vector, c.encode_utf8(&mut buf).as_bytes());
        }
        for pair in chars.windows(2) {
            let token: String = pair.iter().collect();
            self.bump(&mut vector, token.as_bytes());
        }
        l2_normalize(&mut vector);
        vector
    }

    fn bump(&self, vector: &mut [f32], token: &[u8]) {
        let hash = blake3::hash(token);
        let b = hash.as_bytes();
        let bucket = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        let idx = (bucket % self.dims as u64) as usize;
        let sign = if b[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// L2-normalize a vector in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ── Remote ─────────────────────────────────────────────────────

/// OpenAI-compatible `/embeddings` client with per-text retry.
///
/// A text that still fails after retries gets a zero vector instead of failing
/// the whole batch. The zero vector's width is the first real vector's width in
/// the batch, else the last width seen, else the configured fallback.
pub struct RemoteEmbedding {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
    fallback_dims: usize,
    observed_dims: AtomicUsize,
}

impl RemoteEmbedding {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            model,
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            fallback_dims: 1024,
            observed_dims: AtomicUsize::new(0),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_fallback_dims(mut self, dims: usize) -> Self {
        self.fallback_dims = dims;
        self
    }

    async fn request_one(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": &self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| KouriError::Embedding(format!("embedding request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(KouriError::Embedding(format!("embedding HTTP {}: {}", status, text)));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| KouriError::Embedding(format!("embedding parse error: {}", e)))?;

        let embedding: Vec<f32> = data["data"][0]["embedding"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            .unwrap_or_default();

        if embedding.is_empty() {
            return Err(KouriError::Embedding("response contained no embedding".into()));
        }
        Ok(embedding)
    }

    async fn embed_with_retry(&self, text: &str) -> Option<Vec<f32>> {
        let attempts = self.max_retries + 1;
        for attempt in 1..=attempts {
            match self.request_one(text).await {
                Ok(v) => return Some(v),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "embedding attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!(model = %self.model, count = texts.len(), "generating embeddings");

        // None = failed after retries; Some(empty) = blank input.
        let mut raw: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                raw.push(Some(vec![]));
            } else {
                raw.push(self.embed_with_retry(text).await);
            }
        }

        // Only a real vector may fix the width; placeholders reuse it.
        let contract = match raw.iter().flatten().find(|v| !v.is_empty()) {
            Some(v) => {
                self.observed_dims.store(v.len(), Ordering::Relaxed);
                v.len()
            }
            None => match self.observed_dims.load(Ordering::Relaxed) {
                0 if raw.iter().any(Option::is_none) => {
                    return Err(KouriError::Embedding(
                        "every embedding request failed and no vector width is known yet".into(),
                    ));
                }
                0 => self.fallback_dims,
                seen => seen,
            },
        };

        let out = raw
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Some(v) if v.is_empty() || v.len() == contract => v,
                Some(v) => {
                    warn!(index = i, expected = contract, actual = v.len(), "embedding width drifted, using zero vector");
                    vec![0.0; contract]
                }
                None => {
                    warn!(index = i, dims = contract, "embedding failed after retries, using zero vector");
                    vec![0.0; contract]
                }
            })
            .collect();

        Ok(out)
    }

    fn dimensions(&self) -> usize {
        match self.observed_dims.load(Ordering::Relaxed) {
            0 => self.fallback_dims,
            seen => seen,
        }
    }

    fn name(&self) -> &str {
        "remote"
    }
}
