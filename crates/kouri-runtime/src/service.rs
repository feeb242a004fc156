//! # Chat service
//!
//! The loop around the memory core: inbound messages are debounced per user,
//! a message that lands while the same user's reply is still generating
//! raises an interrupt, and every flush runs through [`ChatPipeline`].
//! Outcomes are delivered on a channel in completion order.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::debounce::{Debouncer, Flush};
use crate::engine::MemoryEngine;
use crate::pipeline::{ChatOutcome, ChatPipeline};
use kouri_core::Result;

/// One finished prompt.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub user_id: String,
    pub prompt: String,
    pub outcome: ChatOutcome,
}

#[derive(Default)]
struct Turns {
    in_flight: HashSet<String>,
    locks: HashMap<String, Arc<TokioMutex<()>>>,
}

pub struct ChatService {
    engine: Arc<MemoryEngine>,
    debouncer: Debouncer,
    turns: Arc<Mutex<Turns>>,
    worker: JoinHandle<()>,
}

impl ChatService {
    /// Start the service. Returns it together with the outcome stream.
    pub fn start(engine: Arc<MemoryEngine>) -> Result<(Self, mpsc::UnboundedReceiver<ServiceEvent>)> {
        let pipeline = Arc::new(ChatPipeline::new(engine.clone())?);
        let wait = Duration::from_millis(engine.config().debounce.wait_ms);
        let (debouncer, flushes) = Debouncer::new(wait);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let turns = Arc::new(Mutex::new(Turns::default()));

        let worker = tokio::spawn(run_worker(flushes, pipeline, turns.clone(), events_tx));
        info!(wait_ms = wait.as_millis() as u64, "chat service started");

        Ok((
            Self {
                engine,
                debouncer,
                turns,
                worker,
            },
            events_rx,
        ))
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }

    /// Accept an inbound message.
    pub fn on_message(&self, user_id: &str, message: &str) {
        if self.turns.lock().in_flight.contains(user_id) {
            self.engine.context().begin_interrupt(user_id, message);
        }
        self.debouncer.push(user_id, message);
    }

    pub fn is_generating(&self, user_id: &str) -> bool {
        self.turns.lock().in_flight.contains(user_id)
    }

    pub fn stop(self) {
        self.worker.abort();
        info!("chat service stopped");
    }
}

async fn run_worker(
    mut flushes: mpsc::UnboundedReceiver<Flush>,
    pipeline: Arc<ChatPipeline>,
    turns: Arc<Mutex<Turns>>,
    events: mpsc::UnboundedSender<ServiceEvent>,
) {
    while let Some(flush) = flushes.recv().await {
        let pipeline = pipeline.clone();
        let turns = turns.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let Flush { user_id, messages } = flush;
            let prompt = messages.join("\n");

            // One prompt per user at a time, in flush order.
            let lock = turns.lock().locks.entry(user_id.clone()).or_default().clone();
            let _turn = lock.lock().await;

            turns.lock().in_flight.insert(user_id.clone());
            let outcome = pipeline.handle_prompt(&user_id, &prompt).await;
            turns.lock().in_flight.remove(&user_id);

            if matches!(outcome, ChatOutcome::Reply(_)) {
                match pipeline.engine().maybe_consolidate(&user_id).await {
                    Ok(Some(_)) => info!(user_id = %user_id, "short-term log consolidated"),
                    Ok(None) => {}
                    Err(e) => warn!(user_id = %user_id, error = %e, "consolidation failed"),
                }
            }

            let _ = events.send(ServiceEvent {
                user_id,
                prompt,
                outcome,
            });
        });
    }
}
