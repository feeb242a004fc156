use thiserror::Error;

/// Unified error type for the whole Kouri memory engine.
#[derive(Error, Debug)]
pub enum KouriError {
    // ── Context errors ─────────────────────────────────────────
    #[error("context error: {0}")]
    Context(String),

    // ── Index / embedding errors ───────────────────────────────
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // ── Rerank errors ──────────────────────────────────────────
    #[error("rerank error: {0}")]
    Rerank(String),

    // ── Generation errors ──────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    // ── Memory store errors ────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    #[error("summarizer error: {0}")]
    Summarizer(String),

    // ── Service wiring ─────────────────────────────────────────
    #[error("not configured: {0}")]
    NotConfigured(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KouriError>;
