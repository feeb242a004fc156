//! # kouri-memory
//!
//! The memory core of the Kouri engine:
//!
//! - **Context window**: per-user bounded dialogue with importance-based
//!   eviction, interrupt capture and a synthetic context-summary turn.
//! - **Vector index**: documents plus embeddings, L2 nearest-neighbor search,
//!   optional re-ranking.
//! - **Fact store**: durable key→value facts with write hooks that keep the
//!   index current.
//! - **Consolidation**: raw short-term log → dated long-term summaries.

pub mod context;
pub mod index;
pub mod journal;
pub mod salience;
pub mod sanitize;
pub mod search;
pub mod store;
pub mod summarizer;

pub use context::{ContextManager, ContextWindow, EvictedPair, PendingInterruption, RemovalHook};
pub use index::VectorIndex;
pub use journal::{LongTermBuffer, ShortTermLog};
pub use salience::{SUMMARY_PREFIX, SalienceScorer};
pub use sanitize::clean_memory_content;
pub use search::{FlatL2, ParallelL2, SearchBackend, build_backend};
pub use store::{MemoryHook, MemoryStore};
pub use summarizer::{SummaryTarget, Summarizer};
