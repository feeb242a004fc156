//! # kouri-runtime
//!
//! Wires the memory core into a running service.
//!
//! ```text
//!   inbound message
//!         │
//!         ▼
//!   ┌─────────────┐   in flight?   ┌──────────────────┐
//!   │ ChatService │ ─────────────▶ │ begin_interrupt  │
//!   └──────┬──────┘                └──────────────────┘
//!          │ debounce
//!          ▼
//!   ┌──────────────┐  merge → retrieve → generate → commit
//!   │ ChatPipeline │ ─────────────────────────────────────▶ ContextManager
//!   └──────┬───────┘                                         │ evicted pairs
//!          │                                                 ▼
//!          │                                          short-term raw log
//!          ▼                                                 │ threshold
//!   ┌──────────────┐      fact hook      ┌─────────────┐      ▼
//!   │ MemoryStore  │ ──────────────────▶ │ VectorIndex │   Summarizer
//!   └──────────────┘                     └─────────────┘
//! ```

pub mod debounce;
pub mod engine;
pub mod logging;
pub mod pipeline;
pub mod service;

pub use debounce::{Debouncer, Flush};
pub use engine::{Collaborators, MemoryEngine};
pub use pipeline::{ChatOutcome, ChatPipeline, collapse_repeat, parse_command};
pub use service::{ChatService, ServiceEvent};
