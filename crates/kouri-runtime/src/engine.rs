//! # Memory engine
//!
//! The explicitly constructed service object that owns every memory
//! component. Callers get it from [`MemoryEngine::start`] and pass it (or an
//! `Arc` of it) to whoever needs it; nothing here is global.
//!
//! Startup order:
//! 1. Collaborators are chosen from config (local or remote variants).
//! 2. The fact store is opened and its facts bulk-seed the vector index.
//! 3. A store hook is registered that forwards every new fact to a feeder
//!    task, which batches them into the index.
//! 4. The context window's removal hook is pointed at the per-user raw log.

use kouri_config::{KouriConfig, ProviderKind};
use kouri_core::{KouriError, Result};
use kouri_llm::{
    EmbeddingProvider, LlmProvider, LocalEmbedding, LocalScorer, OpenAiProvider, RelevanceScorer,
    RemoteEmbedding, RemoteScorer,
};
use kouri_memory::{
    ContextManager, LongTermBuffer, MemoryStore, ShortTermLog, Summarizer, SummaryTarget, VectorIndex,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EMBEDDING_RETRY_DELAY: Duration = Duration::from_millis(500);

/// The network-bound collaborators the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generation: Option<Arc<dyn LlmProvider>>,
    pub scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl Collaborators {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            generation: None,
            scorer: None,
        }
    }

    pub fn with_generation(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.generation = Some(provider);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Pick each variant from config. Remote variants without credentials
    /// are a configuration error.
    pub fn from_config(config: &KouriConfig) -> Result<Self> {
        let embedding = &config.embedding;
        let embedder: Arc<dyn EmbeddingProvider> = match embedding.provider {
            ProviderKind::Local => Arc::new(LocalEmbedding::new(embedding.dimensions)),
            ProviderKind::Remote => {
                let key = embedding
                    .api_key
                    .clone()
                    .ok_or_else(|| KouriError::NotConfigured("embedding.api_key".into()))?;
                Arc::new(
                    RemoteEmbedding::new(key, embedding.model.clone())
                        .with_base_url(embedding.base_url.clone())
                        .with_retries(embedding.max_retries, EMBEDDING_RETRY_DELAY)
                        .with_fallback_dims(embedding.fallback_dimensions),
                )
            }
        };

        let generation: Option<Arc<dyn LlmProvider>> = config.generation.api_key.clone().map(|key| {
            Arc::new(OpenAiProvider::new(key).with_base_url(config.generation.base_url.clone(), "openai".into()))
                as Arc<dyn LlmProvider>
        });

        let scorer: Option<Arc<dyn RelevanceScorer>> = if !config.retrieval.rerank {
            None
        } else {
            match config.rerank.provider {
                ProviderKind::Local => Some(Arc::new(LocalScorer::new())),
                ProviderKind::Remote => {
                    let provider = generation
                        .clone()
                        .ok_or_else(|| KouriError::NotConfigured("generation.api_key (remote rerank)".into()))?;
                    let model = config
                        .rerank
                        .model
                        .clone()
                        .unwrap_or_else(|| config.generation.model.clone());
                    Some(Arc::new(RemoteScorer::new(provider, model)?))
                }
            }
        };

        info!(
            embedder = embedder.name(),
            generation = generation.as_ref().map(|g| g.name().to_string()).unwrap_or_default(),
            scorer = scorer.as_ref().map(|s| s.name().to_string()).unwrap_or_default(),
            "collaborators selected"
        );

        Ok(Self {
            embedder,
            generation,
            scorer,
        })
    }
}

enum FeedCommand {
    Add(String),
    Flush(oneshot::Sender<()>),
}

/// Owns the context window, vector index, fact store and summarizer.
pub struct MemoryEngine {
    config: KouriConfig,
    context: Arc<ContextManager>,
    index: Arc<VectorIndex>,
    store: Arc<MemoryStore>,
    generation: Option<Arc<dyn LlmProvider>>,
    summarizer: Option<Summarizer>,
    feeder: mpsc::UnboundedSender<FeedCommand>,
    feeder_task: JoinHandle<()>,
}

impl MemoryEngine {
    /// Build collaborators from config, then start.
    pub async fn from_config(config: KouriConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::start(config, collaborators).await
    }

    /// Wire every component and seed the index. Must run inside a tokio runtime.
    pub async fn start(config: KouriConfig, collaborators: Collaborators) -> Result<Self> {
        let context = Arc::new(ContextManager::new(&config.context)?);

        let mut index = VectorIndex::new(collaborators.embedder.clone(), config.retrieval.index);
        if let Some(scorer) = collaborators.scorer.clone() {
            index = index.with_scorer(scorer);
        }
        let index = Arc::new(index);

        let store = Arc::new(MemoryStore::open(config.storage.facts_path())?);
        let seed = store.get_key_value_pairs();
        if !seed.is_empty() {
            match index.add_documents(&seed).await {
                Ok(added) => info!(added, "vector index seeded from fact store"),
                Err(e) => warn!(error = %e, "seeding the vector index failed, starting with an empty index"),
            }
        }

        let (feeder, rx) = mpsc::unbounded_channel();
        let feeder_task = tokio::spawn(run_feeder(index.clone(), rx));
        let hook_tx = feeder.clone();
        store.add_memory_hook(Arc::new(move |key: &str, value: &str| {
            if hook_tx.send(FeedCommand::Add(format!("{}:{}", key, value))).is_err() {
                warn!(key, "index feeder stopped, fact not indexed");
            }
        }));

        let storage = config.storage.clone();
        context.set_removal_hook(Arc::new(move |user_id: &str, user_text: &str, assistant_text: &str| {
            let log = ShortTermLog::new(storage.raw_log_path(user_id));
            if let Err(e) = log.append_exchange(user_text, assistant_text) {
                warn!(user_id, error = %e, "failed to archive evicted exchange");
            }
        }));

        let summarizer = collaborators
            .generation
            .clone()
            .map(|provider| Summarizer::new(provider, config.generation.model.clone(), config.summarizer.clone()));

        info!(
            facts = store.len(),
            indexed = index.len(),
            max_pairs = context.max_pairs(),
            "memory engine started"
        );

        Ok(Self {
            config,
            context,
            index,
            store,
            generation: collaborators.generation,
            summarizer,
            feeder,
            feeder_task,
        })
    }

    pub fn config(&self) -> &KouriConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn generation(&self) -> Result<Arc<dyn LlmProvider>> {
        self.generation
            .clone()
            .ok_or_else(|| KouriError::NotConfigured("generation provider".into()))
    }

    pub fn summarizer(&self) -> Result<&Summarizer> {
        self.summarizer
            .as_ref()
            .ok_or_else(|| KouriError::NotConfigured("summarizer (needs a generation provider)".into()))
    }

    pub fn raw_log(&self, user_id: &str) -> ShortTermLog {
        ShortTermLog::new(self.config.storage.raw_log_path(user_id))
    }

    pub fn long_term_buffer(&self, user_id: &str) -> LongTermBuffer {
        LongTermBuffer::new(self.config.storage.long_term_path(user_id))
    }

    /// Memories relevant to `query`, using the configured `top_k` and rerank flag.
    pub async fn retrieve(&self, query: &str) -> Vec<String> {
        let retrieval = &self.config.retrieval;
        self.index.query(query, retrieval.top_k, retrieval.rerank).await
    }

    /// Store a fact (sanitized, deduplicated). The index picks it up through the feeder.
    pub fn remember(&self, key: &str, value: &str) -> Result<bool> {
        self.store.remember(key, value)
    }

    /// Wait until every fact written so far has reached the index.
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.feeder
            .send(FeedCommand::Flush(tx))
            .map_err(|_| KouriError::Index("index feeder stopped".into()))?;
        rx.await.map_err(|_| KouriError::Index("index feeder stopped".into()))
    }

    /// Run the summarizer for `user_id` if its raw log has reached the threshold.
    pub async fn maybe_consolidate(&self, user_id: &str) -> Result<Option<String>> {
        let summarizer = self.summarizer()?;
        let raw_log = self.raw_log(user_id);
        if !summarizer.should_run(&raw_log) {
            return Ok(None);
        }
        let buffer = self.long_term_buffer(user_id);
        summarizer
            .consolidate(SummaryTarget {
                user_id,
                raw_log: &raw_log,
                buffer: &buffer,
                store: Some(&self.store),
            })
            .await
    }

    /// Stop the feeder after it has drained what was already sent.
    pub async fn shutdown(self) {
        if let Err(e) = self.sync().await {
            warn!(error = %e, "index feeder already gone at shutdown");
        }
        // The store hook keeps a sender alive, so the channel never closes on its own.
        self.feeder_task.abort();
        info!("memory engine stopped");
    }
}

async fn run_feeder(index: Arc<VectorIndex>, mut rx: mpsc::UnboundedReceiver<FeedCommand>) {
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::new();
        let mut waiters = Vec::new();
        let mut push = |cmd: FeedCommand| match cmd {
            FeedCommand::Add(doc) => batch.push(doc),
            FeedCommand::Flush(tx) => waiters.push(tx),
        };
        push(first);
        while let Ok(cmd) = rx.try_recv() {
            push(cmd);
        }

        if !batch.is_empty() {
            match index.add_documents(&batch).await {
                Ok(added) => debug!(added, "feeder indexed new facts"),
                Err(e) => warn!(error = %e, count = batch.len(), "feeder could not index new facts"),
            }
        }
        for tx in waiters {
            let _ = tx.send(());
        }
    }
}
