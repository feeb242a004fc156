use chrono::{DateTime, Utc};
use kouri_config::ContextConfig;
use kouri_core::{ConversationTurn, Result, Role, preview};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::salience::{SUMMARY_PREFIX, SalienceScorer};

/// Called once per evicted pair with `(user_id, user_text, assistant_text)`.
pub type RemovalHook = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// One user's bounded dialogue history.
///
/// Layout: optional leading system prompt, optional synthetic summary turn,
/// then alternating user/assistant turns (a trailing user turn may be waiting
/// for its reply).
#[derive(Debug, Clone, Default)]
pub struct ContextWindow {
    system: Option<ConversationTurn>,
    summary: Option<ConversationTurn>,
    turns: Vec<ConversationTurn>,
}

impl ContextWindow {
    fn seeded(system_prompt: Option<&str>) -> Self {
        Self {
            system: system_prompt.map(ConversationTurn::system),
            summary: None,
            turns: Vec::new(),
        }
    }

    /// Number of complete (user, assistant) pairs.
    pub fn pair_count(&self) -> usize {
        self.turns.len() / 2
    }

    /// 1 if a leading system turn is present.
    pub fn system_offset(&self) -> usize {
        usize::from(self.system.is_some())
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_ref().map(|t| t.content.as_str())
    }

    /// Flattened view: system, summary, dialogue.
    pub fn to_turns(&self) -> Vec<ConversationTurn> {
        self.system
            .iter()
            .chain(self.summary.iter())
            .chain(self.turns.iter())
            .cloned()
            .collect()
    }

    /// Restore the user/assistant alternation. Consecutive turns of the same
    /// role are folded into one; an assistant turn with no user turn before it
    /// is dropped. Returns true if anything changed.
    fn heal(&mut self) -> bool {
        let mut healed: Vec<ConversationTurn> = Vec::with_capacity(self.turns.len());
        let mut changed = false;
        for turn in self.turns.drain(..) {
            match healed.last() {
                Some(last) if last.role == turn.role => {
                    let joined = format!("{}\n{}", last.content, turn.content);
                    let role = turn.role;
                    healed.pop();
                    healed.push(ConversationTurn::new(role, joined));
                    changed = true;
                }
                None if turn.role == Role::Assistant => {
                    changed = true;
                }
                _ => healed.push(turn),
            }
        }
        self.turns = healed;
        changed
    }
}

/// Queued state for a user whose reply generation was interrupted.
#[derive(Debug, Clone, Default)]
pub struct PendingInterruption {
    pub partial_response: String,
    pub queued_messages: Vec<String>,
}

#[derive(Default)]
struct ContextState {
    windows: HashMap<String, ContextWindow>,
    pending: HashMap<String, PendingInterruption>,
    interrupted: HashSet<String>,
    last_chat: HashMap<String, DateTime<Utc>>,
}

/// Per-user bounded dialogue history with importance-based eviction,
/// interrupt capture and context-summary injection.
///
/// All per-user state lives behind one lock that is only held for the
/// in-memory mutation; the removal hook runs after the lock is released.
pub struct ContextManager {
    state: Mutex<ContextState>,
    max_pairs: usize,
    system_prompt: Option<String>,
    separator: String,
    scorer: SalienceScorer,
    removal_hook: RwLock<Option<RemovalHook>>,
}

/// A pair removed by eviction.
#[derive(Debug, Clone)]
pub struct EvictedPair {
    pub user: String,
    pub assistant: String,
    pub score: i32,
}

impl ContextManager {
    pub fn new(config: &ContextConfig) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(ContextState::default()),
            max_pairs: config.max_pairs.max(1),
            system_prompt: config.system_prompt.clone(),
            separator: config.message_separator.clone(),
            scorer: SalienceScorer::new(&config.scoring)?,
            removal_hook: RwLock::new(None),
        })
    }

    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    /// Register the hook that receives evicted pairs. Replaces any previous hook.
    pub fn set_removal_hook(&self, hook: RemovalHook) {
        *self.removal_hook.write() = Some(hook);
    }

    // ── Dialogue ───────────────────────────────────────────────

    /// Append a turn. A system turn replaces the window's leading system prompt.
    pub fn append(&self, user_id: &str, role: Role, content: &str) {
        let evicted = {
            let mut state = self.state.lock();
            let window = self.window_mut(&mut state, user_id);
            match role {
                Role::System => window.system = Some(ConversationTurn::system(content)),
                _ => window.turns.push(ConversationTurn::new(role, content)),
            }
            self.enforce_locked(user_id, window)
        };
        self.report(user_id, evicted);
    }

    /// Append a user/assistant pair and enforce capacity.
    pub fn record_exchange(&self, user_id: &str, user_text: &str, assistant_text: &str) {
        let evicted = {
            let mut state = self.state.lock();
            state.last_chat.insert(user_id.to_string(), Utc::now());
            let window = self.window_mut(&mut state, user_id);
            window.turns.push(ConversationTurn::user(user_text));
            window.turns.push(ConversationTurn::assistant(assistant_text));
            self.enforce_locked(user_id, window)
        };
        self.report(user_id, evicted);
    }

    /// Run eviction for one user. Returns the evicted pairs (already reported to the hook).
    pub fn enforce_capacity(&self, user_id: &str) -> Vec<EvictedPair> {
        let evicted = {
            let mut state = self.state.lock();
            let window = self.window_mut(&mut state, user_id);
            self.enforce_locked(user_id, window)
        };
        self.report(user_id, evicted.clone());
        evicted
    }

    /// Snapshot of a user's window (seeded on first access).
    pub fn messages(&self, user_id: &str) -> Vec<ConversationTurn> {
        let mut state = self.state.lock();
        self.window_mut(&mut state, user_id).to_turns()
    }

    pub fn window(&self, user_id: &str) -> ContextWindow {
        let mut state = self.state.lock();
        self.window_mut(&mut state, user_id).clone()
    }

    pub fn pair_count(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .windows
            .get(user_id)
            .map(|w| w.pair_count())
            .unwrap_or(0)
    }

    pub fn last_interaction(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().last_chat.get(user_id).copied()
    }

    pub fn users(&self) -> Vec<String> {
        self.state.lock().windows.keys().cloned().collect()
    }

    /// "New session": drop the window and any pending interruption.
    pub fn clear(&self, user_id: &str) {
        let mut state = self.state.lock();
        state.windows.remove(user_id);
        state.pending.remove(user_id);
        state.interrupted.remove(user_id);
        info!(user_id, "context cleared");
    }

    fn window_mut<'a>(&self, state: &'a mut ContextState, user_id: &str) -> &'a mut ContextWindow {
        state
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| ContextWindow::seeded(self.system_prompt.as_deref()))
    }

    fn enforce_locked(&self, user_id: &str, window: &mut ContextWindow) -> Vec<EvictedPair> {
        if window.heal() {
            warn!(user_id, "context window was malformed, healed");
        }

        let pair_count = window.pair_count();
        if pair_count <= self.max_pairs {
            return Vec::new();
        }

        let paired_len = pair_count * 2;
        let trailing: Vec<ConversationTurn> = window.turns.split_off(paired_len);
        let mut turns = std::mem::take(&mut window.turns).into_iter();

        // (index, score, user, assistant)
        let mut pairs = Vec::with_capacity(pair_count);
        for index in 0..pair_count {
            let (Some(user), Some(assistant)) = (turns.next(), turns.next()) else {
                break;
            };
            let score = self.scorer.score_pair(&user.content, &assistant.content);
            pairs.push((index, score, user, assistant));
        }

        // Highest score first; among equal scores the more recent pair wins.
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        let mut evicted_pairs = pairs.split_off(self.max_pairs);
        pairs.sort_by_key(|p| p.0);
        evicted_pairs.sort_by_key(|p| p.0);

        window.turns = pairs
            .into_iter()
            .flat_map(|(_, _, u, a)| [u, a])
            .chain(trailing)
            .collect();

        window.summary = self
            .scorer
            .summarize(window.turns.iter().rev())
            .map(|s| ConversationTurn::system(format!("{}{}", SUMMARY_PREFIX, s)));

        info!(
            user_id,
            kept = window.pair_count(),
            evicted = evicted_pairs.len(),
            "context window trimmed"
        );

        evicted_pairs
            .into_iter()
            .map(|(_, score, u, a)| {
                debug!(user_id, score, user = %u.preview(50), "evicting pair");
                EvictedPair {
                    user: u.content,
                    assistant: a.content,
                    score,
                }
            })
            .collect()
    }

    fn report(&self, user_id: &str, evicted: Vec<EvictedPair>) {
        if evicted.is_empty() {
            return;
        }
        let hook = self.removal_hook.read().clone();
        if let Some(hook) = hook {
            for pair in &evicted {
                hook(user_id, &pair.user, &pair.assistant);
            }
        }
    }

    // ── Interrupts ─────────────────────────────────────────────

    /// A new message arrived while a reply for `user_id` was still being generated.
    pub fn begin_interrupt(&self, user_id: &str, new_message: &str) {
        let mut state = self.state.lock();
        state.interrupted.insert(user_id.to_string());
        state
            .pending
            .entry(user_id.to_string())
            .or_default()
            .queued_messages
            .push(new_message.to_string());
        info!(user_id, message = %preview(new_message, 30), "generation interrupted by new message");
    }

    /// Record the latest partially generated reply.
    pub fn capture_partial(&self, user_id: &str, partial_text: &str) {
        let mut state = self.state.lock();
        state
            .pending
            .entry(user_id.to_string())
            .or_default()
            .partial_response = partial_text.to_string();
    }

    /// Read and clear the interrupt flag.
    pub fn check_and_clear_interrupt(&self, user_id: &str) -> bool {
        self.state.lock().interrupted.remove(user_id)
    }

    pub fn is_interrupted(&self, user_id: &str) -> bool {
        self.state.lock().interrupted.contains(user_id)
    }

    pub fn pending(&self, user_id: &str) -> Option<PendingInterruption> {
        self.state.lock().pending.get(user_id).cloned()
    }

    /// Fold the unfinished reply and every queued message into one prompt.
    /// Needs both a partial reply and at least one queued message; otherwise
    /// `original_prompt` comes back unchanged. Queued messages without a
    /// partial reply are dropped here, since they arrive as this prompt.
    pub fn consume_merge(&self, user_id: &str, original_prompt: &str) -> String {
        let mut state = self.state.lock();
        let Some(current) = state.pending.get(user_id) else {
            return original_prompt.to_string();
        };
        if current.queued_messages.is_empty() {
            return original_prompt.to_string();
        }
        if current.partial_response.is_empty() {
            let dropped = current.queued_messages.len();
            state.pending.remove(user_id);
            debug!(user_id, dropped, "cleared queued messages with no partial reply");
            return original_prompt.to_string();
        }
        let Some(pending) = state.pending.remove(user_id) else {
            return original_prompt.to_string();
        };
        drop(state);

        info!(
            user_id,
            queued = pending.queued_messages.len(),
            "built merged prompt from interrupted reply"
        );

        format!(
            "以下是一次未完成的回复和用户的新消息，请综合考虑所有内容后给出完整回复：\n\n\
             AI助手之前的回复(未完成): \n{}\n\n\
             用户的新消息: \n{}\n\n\
             请综合考虑上述对话，生成一个完整且连贯的回复。\n",
            pending.partial_response,
            pending.queued_messages.join(&self.separator)
        )
    }
}
