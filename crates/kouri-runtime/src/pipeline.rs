//! The generation call site: turns a user prompt into a committed reply.

use kouri_config::GenerationConfig;
use kouri_core::{ConversationTurn, Result, Role, preview};
use kouri_llm::{LlmProvider, LlmRequest};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::engine::MemoryEngine;

/// Result of one prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// The reply was committed to the context window.
    Reply(String),
    /// A newer message arrived first; `partial` (if any) is kept for the next merge.
    Interrupted { partial: Option<String> },
    /// Every attempt failed. `fallback` is what the user should see.
    Failed { reason: String, fallback: String },
}

impl ChatOutcome {
    /// Text to show the user, if any.
    pub fn display_text(&self) -> Option<&str> {
        match self {
            ChatOutcome::Reply(text) => Some(text),
            ChatOutcome::Interrupted { .. } => None,
            ChatOutcome::Failed { fallback, .. } => Some(fallback),
        }
    }
}

/// Split a leading `system:` / `assistant:` / `user:` command off the prompt.
pub fn parse_command(prompt: &str) -> (Role, &str) {
    for (prefix, role) in [("system:", Role::System), ("assistant:", Role::Assistant), ("user:", Role::User)] {
        let head = prompt.get(..prefix.len());
        if head.is_some_and(|h| h.eq_ignore_ascii_case(prefix)) {
            return (role, prompt[prefix.len()..].trim_start());
        }
    }
    (Role::User, prompt)
}

/// Collapse a reply made of two identical halves (`ABAB` → `AB`).
pub fn collapse_repeat(text: &str) -> &str {
    let chars = text.chars().count();
    if chars < 2 || chars % 2 != 0 {
        return text;
    }
    let split = text.char_indices().nth(chars / 2).map(|(i, _)| i).unwrap_or(text.len());
    let (a, b) = text.split_at(split);
    if a == b { a } else { text }
}

pub struct ChatPipeline {
    engine: Arc<MemoryEngine>,
    provider: Arc<dyn LlmProvider>,
    config: GenerationConfig,
    fallback_cursor: AtomicUsize,
}

impl ChatPipeline {
    pub fn new(engine: Arc<MemoryEngine>) -> Result<Self> {
        let provider = engine.generation()?;
        let config = engine.config().generation.clone();
        Ok(Self {
            engine,
            provider,
            config,
            fallback_cursor: AtomicUsize::new(0),
        })
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }

    fn is_failure(&self, text: &str) -> bool {
        self.config.failure_markers.iter().any(|m| text.contains(m.as_str()))
    }

    fn fallback(&self) -> String {
        let replies = &self.config.fallback_replies;
        if replies.is_empty() {
            return String::new();
        }
        let i = self.fallback_cursor.fetch_add(1, Ordering::Relaxed) % replies.len();
        replies[i].clone()
    }

    fn memory_turn(memories: &[String]) -> ConversationTurn {
        let mut text = String::from("以下是与当前对话相关的记忆：");
        for m in memories {
            text.push_str("\n- ");
            text.push_str(m);
        }
        ConversationTurn::system(text)
    }

    /// Generate and commit a reply for `prompt`.
    pub async fn handle_prompt(&self, user_id: &str, prompt: &str) -> ChatOutcome {
        let context = self.engine.context();
        let merged = context.consume_merge(user_id, prompt);
        // Any interrupt raised so far came from messages already folded into this prompt.
        let _ = context.check_and_clear_interrupt(user_id);

        let (role, content) = parse_command(&merged);
        let content = content.to_string();

        let mut messages = context.messages(user_id);
        let memories = self.engine.retrieve(&content).await;
        if !memories.is_empty() {
            messages.push(Self::memory_turn(&memories));
        }
        messages.push(ConversationTurn::new(role, content.clone()));

        let request = LlmRequest::new(self.config.model.clone(), messages)
            .with_params(self.config.temperature, self.config.max_tokens);

        let mut last_error = String::from("no attempts made");
        let mut reply = None;
        for attempt in 1..=self.config.max_attempts {
            if context.check_and_clear_interrupt(user_id) {
                info!(user_id, attempt, "interrupted before generation call");
                return ChatOutcome::Interrupted { partial: None };
            }
            match self.provider.complete(&request).await {
                Ok(resp) if self.is_failure(&resp.text) => {
                    warn!(user_id, attempt, response = %preview(&resp.text, 40), "reply carries a failure marker");
                    last_error = resp.text;
                }
                Ok(resp) => {
                    reply = Some(resp.text);
                    break;
                }
                Err(e) => {
                    warn!(user_id, attempt, error = %e, "generation call failed");
                    last_error = e.to_string();
                }
            }
        }

        let Some(reply) = reply else {
            let reason = format!("多次尝试后仍然失败: {}", last_error);
            warn!(user_id, reason = %reason, "giving up on prompt");
            return ChatOutcome::Failed {
                reason,
                fallback: self.fallback(),
            };
        };
        let reply = collapse_repeat(reply.trim()).to_string();

        if context.check_and_clear_interrupt(user_id) {
            info!(user_id, "interrupted before commit, keeping reply for merge");
            context.capture_partial(user_id, &reply);
            return ChatOutcome::Interrupted { partial: Some(reply) };
        }

        context.record_exchange(user_id, &content, &reply);
        ChatOutcome::Reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_prefixes() {
        assert_eq!(parse_command("System: 你是猫"), (Role::System, "你是猫"));
        assert_eq!(parse_command("assistant:好的"), (Role::Assistant, "好的"));
        assert_eq!(parse_command("user: hi"), (Role::User, "hi"));
        assert_eq!(parse_command("今天天气如何"), (Role::User, "今天天气如何"));
        assert_eq!(parse_command("sys"), (Role::User, "sys"));
    }

    #[test]
    fn test_collapse_repeat() {
        assert_eq!(collapse_repeat("哈哈好的哈哈好的"), "哈哈好的");
        assert_eq!(collapse_repeat("abab"), "ab");
        assert_eq!(collapse_repeat("abc"), "abc");
        assert_eq!(collapse_repeat("abcd"), "abcd");
        assert_eq!(collapse_repeat("a"), "a");
    }
}
