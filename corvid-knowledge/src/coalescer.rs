//! Debounced, serialized snapshot persistence.
//!
//! The coalescer keeps one pending slot and one in-flight flag instead of a
//! write queue: a snapshot scheduled while a write is running supersedes
//! anything queued-but-not-started, so only the latest state ever reaches
//! the store. An in-flight write is never interrupted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::TrackerResult;
use crate::models::{AgentPatch, KnowledgeSnapshot};
use crate::store::{BackingStore, EntityStore};

/// Destination for coalesced snapshot writes.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, snapshot: &KnowledgeSnapshot) -> TrackerResult<()>;
}

/// Production sink: saves the JSON snapshot under the agent's storage key
/// and patches the knowledge field of the owning agent record, so other
/// owners importing via the entity store always see the latest persisted
/// state.
pub struct AgentSnapshotSink {
    store: Arc<dyn BackingStore>,
    entities: Arc<dyn EntityStore>,
    storage_key: String,
    agent_id: String,
}

impl AgentSnapshotSink {
    pub fn new(
        store: Arc<dyn BackingStore>,
        entities: Arc<dyn EntityStore>,
        storage_key: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            entities,
            storage_key: storage_key.into(),
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl SnapshotSink for AgentSnapshotSink {
    async fn persist(&self, snapshot: &KnowledgeSnapshot) -> TrackerResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.store.save(&self.storage_key, &payload).await?;
        self.entities
            .update_entity(
                &self.agent_id,
                AgentPatch {
                    knowledge: Some(snapshot.clone()),
                },
            )
            .await
    }
}

#[derive(Default)]
struct CoalescerState {
    pending: Option<KnowledgeSnapshot>,
    in_flight: bool,
    last_error: Option<String>,
}

pub struct PersistenceCoalescer {
    sink: Arc<dyn SnapshotSink>,
    debounce: Duration,
    state: Arc<Mutex<CoalescerState>>,
    /// Skips the debounce sleep of the writer task (used by `flush`).
    kick: Arc<Notify>,
    busy_tx: watch::Sender<bool>,
    busy_rx: watch::Receiver<bool>,
}

impl PersistenceCoalescer {
    pub fn new(sink: Arc<dyn SnapshotSink>, debounce: Duration) -> Self {
        let (busy_tx, busy_rx) = watch::channel(false);
        Self {
            sink,
            debounce,
            state: Arc::new(Mutex::new(CoalescerState::default())),
            kick: Arc::new(Notify::new()),
            busy_tx,
            busy_rx,
        }
    }

    /// Schedule a snapshot write. If a writer task is already in flight the
    /// snapshot lands in the pending slot, superseding any snapshot that
    /// has not started writing yet; otherwise a writer task is spawned.
    pub fn schedule(&self, snapshot: KnowledgeSnapshot) {
        let mut state = lock(&self.state);
        state.pending = Some(snapshot);
        if state.in_flight {
            return;
        }
        state.in_flight = true;
        // busy must flip inside the same critical section as in_flight so
        // flush never observes them out of step.
        let _ = self.busy_tx.send(true);
        drop(state);

        tokio::spawn(run_writer(
            self.sink.clone(),
            self.debounce,
            self.state.clone(),
            self.kick.clone(),
            self.busy_tx.clone(),
        ));
    }

    /// Force completion of all pending writes. Skips the debounce window
    /// and returns once the writer task has drained the pending slot.
    pub async fn flush(&self) {
        let mut busy = self.busy_rx.clone();
        loop {
            {
                let state = lock(&self.state);
                if !state.in_flight && state.pending.is_none() {
                    return;
                }
            }
            self.kick.notify_one();
            // The sender lives as long as self, so this cannot fail.
            if busy.wait_for(|b| !*b).await.is_err() {
                return;
            }
        }
    }

    /// Error from the most recent write attempt, if both the write and its
    /// retry failed. Cleared by the next successful write; while set, the
    /// in-memory snapshot is authoritative and disk is stale.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.state).last_error.clone()
    }
}

async fn run_writer(
    sink: Arc<dyn SnapshotSink>,
    debounce: Duration,
    state: Arc<Mutex<CoalescerState>>,
    kick: Arc<Notify>,
    busy_tx: watch::Sender<bool>,
) {
    loop {
        {
            let mut guard = lock(&state);
            if guard.pending.is_none() {
                guard.in_flight = false;
                let _ = busy_tx.send(false);
                return;
            }
        }

        if !debounce.is_zero() {
            tokio::select! {
                _ = sleep(debounce) => {}
                _ = kick.notified() => {}
            }
        }

        let snapshot = {
            let mut guard = lock(&state);
            match guard.pending.take() {
                Some(snapshot) => snapshot,
                None => {
                    guard.in_flight = false;
                    let _ = busy_tx.send(false);
                    return;
                }
            }
        };

        match sink.persist(&snapshot).await {
            Ok(()) => {
                debug!(items = snapshot.count, "snapshot persisted");
                lock(&state).last_error = None;
            }
            Err(first) => {
                warn!("snapshot write failed, retrying once: {}", first);
                // Retry with the latest known snapshot, which may have
                // superseded the one that just failed.
                let latest = lock(&state).pending.take().unwrap_or(snapshot);
                match sink.persist(&latest).await {
                    Ok(()) => {
                        debug!(items = latest.count, "snapshot persisted on retry");
                        lock(&state).last_error = None;
                    }
                    Err(second) => {
                        warn!("snapshot retry failed, state is stale on disk: {}", second);
                        lock(&state).last_error = Some(second.to_string());
                    }
                }
            }
        }
    }
}

fn lock(state: &Mutex<CoalescerState>) -> std::sync::MutexGuard<'_, CoalescerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
