use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A user's buffered messages, handed over once they went quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub user_id: String,
    /// In arrival order.
    pub messages: Vec<String>,
}

struct Pending {
    messages: Vec<String>,
    generation: u64,
    timer: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<String, Pending>>>;

/// Per-user message buffering: each new message restarts the user's timer,
/// and when it runs out the whole buffer is flushed as one [`Flush`].
pub struct Debouncer {
    wait: Duration,
    pending: PendingMap,
    tx: mpsc::UnboundedSender<Flush>,
}

impl Debouncer {
    /// Create a debouncer and the receiver its flushes are delivered to.
    pub fn new(wait: Duration) -> (Self, mpsc::UnboundedReceiver<Flush>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            wait,
            pending: Arc::new(Mutex::new(HashMap::new())),
            tx,
        };
        (debouncer, rx)
    }

    /// Buffer `message` and restart the user's timer. Must run inside a tokio runtime.
    pub fn push(&self, user_id: &str, message: &str) {
        let mut pending = self.pending.lock();
        let (mut messages, generation) = match pending.remove(user_id) {
            Some(prev) => {
                prev.timer.abort();
                (prev.messages, prev.generation + 1)
            }
            None => (Vec::new(), 0),
        };
        messages.push(message.to_string());
        debug!(user_id, buffered = messages.len(), "message buffered");

        let timer = tokio::spawn(fire_after(
            self.wait,
            self.pending.clone(),
            self.tx.clone(),
            user_id.to_string(),
            generation,
        ));
        pending.insert(
            user_id.to_string(),
            Pending {
                messages,
                generation,
                timer,
            },
        );
    }

    /// Messages currently waiting for `user_id`.
    pub fn buffered(&self, user_id: &str) -> usize {
        self.pending.lock().get(user_id).map(|p| p.messages.len()).unwrap_or(0)
    }

    /// Drop a user's buffer without flushing it.
    pub fn cancel(&self, user_id: &str) -> Vec<String> {
        match self.pending.lock().remove(user_id) {
            Some(p) => {
                p.timer.abort();
                p.messages
            }
            None => Vec::new(),
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        for (_, p) in self.pending.lock().drain() {
            p.timer.abort();
        }
    }
}

async fn fire_after(
    wait: Duration,
    pending: PendingMap,
    tx: mpsc::UnboundedSender<Flush>,
    user_id: String,
    generation: u64,
) {
    tokio::time::sleep(wait).await;
    let messages = {
        let mut pending = pending.lock();
        // A timer that lost the race against a newer push must not take its buffer.
        if pending.get(&user_id).is_none_or(|p| p.generation != generation) {
            return;
        }
        match pending.remove(&user_id) {
            Some(p) => p.messages,
            None => return,
        }
    };
    debug!(user_id = %user_id, count = messages.len(), "flushing buffered messages");
    let _ = tx.send(Flush { user_id, messages });
}
