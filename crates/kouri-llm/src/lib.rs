//! # kouri-llm
//!
//! Contracts for the network-bound collaborators of the memory engine (text
//! generation, embedding, relevance scoring), each with a local and a remote
//! variant, plus mocks for tests.

pub mod provider;
pub mod openai;
pub mod embedding;
pub mod rerank;
pub mod mock;

pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, Usage};
pub use openai::OpenAiProvider;
pub use embedding::{EmbeddingProvider, LocalEmbedding, RemoteEmbedding, l2_normalize};
pub use rerank::{LocalScorer, RelevanceScorer, RemoteScorer};
pub use mock::{MockEmbedding, MockProvider, MockScorer};
