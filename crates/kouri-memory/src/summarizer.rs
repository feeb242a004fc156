use chrono::Local;
use kouri_config::SummarizerConfig;
use kouri_core::{ConversationTurn, KouriError, Result, preview};
use kouri_llm::{LlmProvider, LlmRequest};
use std::sync::Arc;
use tracing::{info, warn};

use crate::journal::{LongTermBuffer, ShortTermLog};
use crate::store::MemoryStore;

const SUMMARY_SYSTEM_PROMPT: &str = "你是一个记忆整理助手，负责把一段对话记录浓缩成需要长期记住的要点。";

fn summary_prompt(dialogue: &str) -> String {
    format!(
        "请将以下对话记录总结为最重要的几条长期记忆，按以下优先级取舍：\n\
         1. 用户表达强烈情感（喜爱、厌恶、愤怒、悲伤等）的内容优先级最高；\n\
         2. 其次是对话中反复出现或被多次提及的内容；\n\
         3. 再次是用户明确要求\"记住\"的内容。\n\
         只输出总结本身，使用简洁的中文，不要添加解释。\n\n\
         对话记录：\n{}",
        dialogue
    )
}

/// Where a consolidation run writes.
pub struct SummaryTarget<'a> {
    pub user_id: &'a str,
    pub raw_log: &'a ShortTermLog,
    pub buffer: &'a LongTermBuffer,
    /// Accepted summaries are also stored as facts when set.
    pub store: Option<&'a MemoryStore>,
}

/// Drains a user's raw short-term log into a dated long-term summary.
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, config: SummarizerConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            config,
        }
    }

    /// Whether the raw log has reached the consolidation threshold.
    pub fn should_run(&self, raw_log: &ShortTermLog) -> bool {
        match raw_log.line_count() {
            Ok(lines) => lines >= self.config.threshold_lines(),
            Err(e) => {
                warn!(error = %e, "could not read raw log");
                false
            }
        }
    }

    fn is_retry_response(&self, text: &str) -> bool {
        text.trim().is_empty() || self.config.retry_sentinels.iter().any(|s| text.contains(s.as_str()))
    }

    /// Summarize the raw log. Returns the accepted summary, or `None` when the
    /// log is empty. If every attempt fails nothing on disk is touched.
    pub async fn consolidate(&self, target: SummaryTarget<'_>) -> Result<Option<String>> {
        let dialogue = target.raw_log.read()?;
        if dialogue.trim().is_empty() {
            return Ok(None);
        }

        let request = LlmRequest::new(self.model.clone(), vec![ConversationTurn::user(summary_prompt(&dialogue))])
            .with_system(SUMMARY_SYSTEM_PROMPT);

        let mut summary = None;
        for attempt in 1..=self.config.max_attempts {
            info!(user_id = target.user_id, attempt, "summarizing raw log");
            match self.provider.complete(&request).await {
                Ok(resp) if self.is_retry_response(&resp.text) => {
                    warn!(user_id = target.user_id, attempt, response = %preview(&resp.text, 40), "summary asked for retry");
                }
                Ok(resp) => {
                    summary = Some(resp.text.trim().to_string());
                    break;
                }
                Err(e) => {
                    warn!(user_id = target.user_id, attempt, error = %e, "summary call failed");
                }
            }
        }

        let Some(summary) = summary else {
            return Err(KouriError::Summarizer(format!(
                "no usable summary after {} attempts",
                self.config.max_attempts
            )));
        };

        target.buffer.append(target.user_id, &summary)?;
        target
            .buffer
            .enforce_cap(self.config.buffer_cap_bytes, self.config.keep_entries)?;
        target.raw_log.consume(&dialogue)?;

        if let Some(store) = target.store {
            let key = format!("{}_{}", target.user_id, Local::now().format("%Y-%m-%d %H:%M:%S"));
            store.set(&key, &summary)?;
        }

        info!(user_id = target.user_id, summary = %preview(&summary, 40), "raw log consolidated");
        Ok(Some(summary))
    }
}
