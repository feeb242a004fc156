use async_trait::async_trait;
use kouri_core::{ConversationTurn, KouriError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::provider::{LlmProvider, LlmRequest};

/// Scores how relevant each candidate document is to a query.
///
/// Scores are in `[0, 1]`, higher is more relevant. Implementations never fail:
/// a candidate that cannot be scored gets `0.0`.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Vec<f32>;

    fn name(&self) -> &str;
}

// ── Local ──────────────────────────────────────────────────────

/// Deterministic pairwise scorer: Dice overlap of character bigrams.
pub struct LocalScorer;

impl LocalScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(query: &str, document: &str) -> f32 {
        let a = shingles(query);
        let b = shingles(document);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let shared = a.intersection(&b).count();
        (2 * shared) as f32 / (a.len() + b.len()) as f32
    }
}

impl Default for LocalScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Character bigrams, or unigrams for one-character input.
fn shingles(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if chars.len() < 2 {
        return chars.iter().map(|c| c.to_string()).collect();
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

#[async_trait]
impl RelevanceScorer for LocalScorer {
    async fn rerank(&self, query: &str, documents: &[String]) -> Vec<f32> {
        documents.iter().map(|d| Self::score(query, d)).collect()
    }

    fn name(&self) -> &str {
        "local"
    }
}

// ── Remote ─────────────────────────────────────────────────────

const SCORER_SYSTEM_PROMPT: &str =
    "您是一个帮助评估文档与查询相关性的助手。请仅返回一个0到1之间的浮点数，不要包含其他文本。";

const SCORE_PATTERN: &str = r"0?\.\d+|\d\.?\d*";

/// LLM-backed scorer: one chat call per candidate, numeric answer parsed out of free text.
pub struct RemoteScorer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    score_re: Regex,
}

impl RemoteScorer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Result<Self> {
        let score_re = Regex::new(SCORE_PATTERN).map_err(|e| KouriError::Rerank(e.to_string()))?;
        Ok(Self {
            provider,
            model: model.into(),
            score_re,
        })
    }

    /// Pull the first number out of `text` and clamp it to `[0, 1]`.
    pub fn parse_score(&self, text: &str) -> Option<f32> {
        let m = self.score_re.find(text.trim())?;
        let value: f32 = m.as_str().parse().ok()?;
        Some(value.clamp(0.0, 1.0))
    }

    async fn score_one(&self, query: &str, document: &str) -> f32 {
        let prompt = format!(
            "查询：{}\n文档：{}\n请评估该文档与查询的相关性分数（0-1）：",
            query, document
        );
        let request = LlmRequest::new(self.model.clone(), vec![ConversationTurn::user(prompt)])
            .with_system(SCORER_SYSTEM_PROMPT)
            .with_params(0.0, 10);

        match self.provider.complete(&request).await {
            Ok(resp) => match self.parse_score(&resp.text) {
                Some(score) => score,
                None => {
                    warn!(answer = %resp.text, "could not parse relevance score");
                    0.0
                }
            },
            Err(e) => {
                warn!(error = %e, "relevance scoring call failed");
                0.0
            }
        }
    }
}

#[async_trait]
impl RelevanceScorer for RemoteScorer {
    async fn rerank(&self, query: &str, documents: &[String]) -> Vec<f32> {
        debug!(candidates = documents.len(), "remote rerank");
        let mut scores = Vec::with_capacity(documents.len());
        for doc in documents {
            scores.push(self.score_one(query, doc).await);
        }
        scores
    }

    fn name(&self) -> &str {
        "remote"
    }
}
