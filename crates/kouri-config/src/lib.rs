//! # kouri-config
//!
//! Configuration system for the Kouri memory engine. Reads from `kouri.toml`
//! and environment variables, in that precedence order.

pub mod schema;
pub mod loader;

pub use schema::KouriConfig;
pub use schema::{
    ConfigWarning, ContextConfig, DebounceConfig, EmbeddingConfig, GenerationConfig, IndexKind,
    LoggingConfig, ProviderKind, RerankConfig, RetrievalConfig, ScoringConfig, StorageConfig,
    SummarizerConfig, WarningSeverity,
};
pub use loader::ConfigLoader;
