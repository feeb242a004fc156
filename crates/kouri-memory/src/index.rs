use kouri_config::IndexKind;
use kouri_core::{KouriError, Result, preview};
use kouri_llm::{EmbeddingProvider, RelevanceScorer};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::search::{SearchBackend, build_backend};

/// Text used to learn the embedding width when a query arrives before any add.
const PROBE_TEXT: &str = "sample text";

#[derive(Default)]
struct IndexState {
    documents: Vec<String>,
    backend: Option<Box<dyn SearchBackend>>,
}

/// Long-term retrieval: documents plus their embeddings, queried by L2
/// distance and optionally re-ranked.
///
/// The document array and the search backend are only ever mutated together
/// under one write lock, so `documents.len() == backend.len()` holds for
/// every reader.
pub struct VectorIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    kind: IndexKind,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, kind: IndexKind) -> Self {
        Self {
            embedder,
            scorer: None,
            kind,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn len(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding width, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.state.read().backend.as_ref().map(|b| b.dimension())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().backend.is_some()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.state.read().backend.as_ref().map(|b| b.name())
    }

    pub fn documents(&self) -> Vec<String> {
        self.state.read().documents.clone()
    }

    /// Embed and append `docs`. Returns the number of documents indexed.
    ///
    /// Blank documents (empty embedding) are skipped. A batch whose width
    /// disagrees with itself or with the index is rejected as a whole and
    /// leaves the index untouched.
    pub async fn add_documents(&self, docs: &[String]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = docs.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed(&texts).await.map_err(|e| {
            warn!(error = %e, count = docs.len(), "embedding failed, documents not indexed");
            e
        })?;

        if vectors.len() != docs.len() {
            warn!(expected = docs.len(), actual = vectors.len(), "embedding count mismatch");
            return Err(KouriError::Index(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }

        let (kept_docs, kept_vectors): (Vec<String>, Vec<Vec<f32>>) = docs
            .iter()
            .cloned()
            .zip(vectors)
            .filter(|(_, v)| !v.is_empty())
            .unzip();

        let Some(dim) = kept_vectors.first().map(Vec::len) else {
            debug!(count = docs.len(), "only blank documents, nothing to index");
            return Ok(0);
        };
        if let Some(bad) = kept_vectors.iter().find(|v| v.len() != dim) {
            warn!(expected = dim, actual = bad.len(), "mixed embedding widths in batch, rejected");
            return Err(KouriError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let mut state = self.state.write();
        let backend = state
            .backend
            .get_or_insert_with(|| {
                info!(dim, kind = ?self.kind, "initializing vector index");
                build_backend(self.kind, dim)
            });
        if backend.dimension() != dim {
            warn!(expected = backend.dimension(), actual = dim, "embedding width changed, batch rejected");
            return Err(KouriError::DimensionMismatch {
                expected: backend.dimension(),
                actual: dim,
            });
        }
        backend.add(&kept_vectors);
        let added = kept_docs.len();
        state.documents.extend(kept_docs);
        debug!(added, total = state.documents.len(), "documents indexed");
        Ok(added)
    }

    /// Top-`top_k` documents closest to `text`. Never fails: every problem
    /// shows up as a shorter (possibly empty) result.
    pub async fn query(&self, text: &str, top_k: usize, use_rerank: bool) -> Vec<String> {
        if top_k == 0 || self.is_empty() {
            return Vec::new();
        }
        if !self.is_initialized() {
            self.ensure_initialized().await;
        }

        let vector = match self.embedder.embed(&[text]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, query = %preview(text, 30), "query embedding failed");
                return Vec::new();
            }
        };
        if vector.is_empty() {
            return Vec::new();
        }

        let mut candidates = {
            let state = self.state.read();
            let Some(backend) = state.backend.as_ref() else {
                return Vec::new();
            };
            if backend.dimension() != vector.len() {
                warn!(
                    expected = backend.dimension(),
                    actual = vector.len(),
                    "query embedding width does not match index"
                );
                return Vec::new();
            }
            let pool = if use_rerank { top_k.saturating_mul(2) } else { top_k };
            let k = pool.min(state.documents.len());
            backend
                .search(&vector, k)
                .into_iter()
                .filter(|(i, _)| *i < state.documents.len())
                .map(|(i, _)| state.documents[i].clone())
                .collect::<Vec<_>>()
        };

        if use_rerank && candidates.len() > 1 {
            if let Some(scorer) = &self.scorer {
                let scores = scorer.rerank(text, &candidates).await;
                let mut scored: Vec<(f32, String)> = scores.into_iter().zip(candidates).collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                candidates = scored.into_iter().map(|(_, d)| d).collect();
            }
        }

        candidates.truncate(top_k);
        candidates
    }

    /// Learn the embedding width from a probe text and build the backend.
    async fn ensure_initialized(&self) {
        let dim = match self.embedder.embed(&[PROBE_TEXT]).await {
            Ok(vectors) => vectors.first().map(Vec::len).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "index probe embedding failed");
                return;
            }
        };
        if dim == 0 {
            return;
        }
        let mut state = self.state.write();
        if state.backend.is_none() {
            info!(dim, "vector index initialized from probe");
            state.backend = Some(build_backend(self.kind, dim));
        }
    }
}
