//! Public operations over the ingestion tracker.
//!
//! One `KnowledgeController` per agent/session, owning its own registry,
//! barrier and coalescer — no process-wide state, so concurrent sessions
//! (multiple tabs, multiple agents) never share anything. A single pump
//! task consumes `IngestEvent`s from the emitter; each event runs to
//! completion before the next, so registry mutation stays race-free behind
//! one short-lived mutex.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use corvid_core::IngestSettings;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::recompute;
use crate::barrier::BatchBarrier;
use crate::coalescer::{AgentSnapshotSink, PersistenceCoalescer};
use crate::emitter::ProgressEmitter;
use crate::errors::{TrackerError, TrackerResult};
use crate::models::{
    IngestEvent, ItemKind, ItemStatus, KnowledgeItem, KnowledgeSnapshot, NewEntry, TrackerEvent,
};
use crate::registry::JobRegistry;
use crate::store::{BackingStore, EntityStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct TrackerState {
    registry: JobRegistry,
    barrier: BatchBarrier,
}

pub struct KnowledgeController {
    agent_id: String,
    storage_key: String,
    state: Arc<Mutex<TrackerState>>,
    emitter: ProgressEmitter,
    coalescer: Arc<PersistenceCoalescer>,
    store: Arc<dyn BackingStore>,
    entities: Arc<dyn EntityStore>,
    updates: broadcast::Sender<TrackerEvent>,
    pump: JoinHandle<()>,
}

impl KnowledgeController {
    pub fn new(
        agent_id: impl Into<String>,
        settings: IngestSettings,
        store: Arc<dyn BackingStore>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        let agent_id = agent_id.into();
        let storage_key = format!("{}:{}", settings.storage_key_prefix, agent_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let sink = AgentSnapshotSink::new(
            store.clone(),
            entities.clone(),
            storage_key.clone(),
            agent_id.clone(),
        );
        let coalescer = Arc::new(PersistenceCoalescer::new(
            Arc::new(sink),
            Duration::from_millis(settings.debounce_ms),
        ));

        let state = Arc::new(Mutex::new(TrackerState::default()));
        let pump = tokio::spawn(run_pump(
            events_rx,
            state.clone(),
            coalescer.clone(),
            updates.clone(),
        ));

        Self {
            agent_id,
            storage_key,
            emitter: ProgressEmitter::new(&settings, events_tx),
            state,
            coalescer,
            store,
            entities,
            updates,
            pump,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Subscribe to state republication (item updates, batch completions).
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.updates.subscribe()
    }

    /// Submit a batch of new sources of one kind.
    ///
    /// Validates synchronously before any job is created; on success the
    /// items are Queued, one emitter per item is running, and the batch id
    /// is returned immediately without waiting for ingestion.
    pub fn submit(&self, kind: ItemKind, entries: Vec<NewEntry>) -> TrackerResult<String> {
        if entries.is_empty() {
            return Err(TrackerError::Validation("empty submission".to_string()));
        }
        for entry in &entries {
            if entry.metadata.kind() != kind {
                return Err(TrackerError::Validation(format!(
                    "entry '{}' is {} but the submission is {}",
                    entry.display_name,
                    entry.metadata.kind(),
                    kind
                )));
            }
        }

        let mut state = self.lock_state();

        // Duplicate URLs are rejected before job creation, both against
        // existing items and within the submission itself.
        let mut seen_urls = Vec::new();
        for entry in &entries {
            if let Some(url) = entry.metadata.url() {
                if state.registry.has_url(url) || seen_urls.contains(&url) {
                    return Err(TrackerError::Validation(format!("duplicate URL: {url}")));
                }
                seen_urls.push(url);
            }
        }

        let mut item_ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let item = KnowledgeItem::new(entry.display_name, entry.metadata);
            item_ids.push(item.id.clone());
            state.registry.register(item)?;
        }
        let batch_id = state.barrier.open_batch(item_ids.iter().cloned());
        drop(state);

        for item_id in &item_ids {
            self.emitter.start(item_id);
            let _ = self.updates.send(TrackerEvent::ItemUpdated {
                item_id: item_id.clone(),
                status: ItemStatus::Queued,
                progress: 0,
            });
        }

        info!(
            batch_id = %batch_id,
            kind = %kind,
            items = item_ids.len(),
            "submitted ingestion batch"
        );
        Ok(batch_id)
    }

    /// Remove an item in any state.
    ///
    /// Cancels its emitter, drops it from its batch without completing the
    /// batch, and forces an immediate recompute + persist, bypassing both
    /// the barrier and the debounce window.
    pub async fn remove(&self, item_id: &str) -> TrackerResult<KnowledgeItem> {
        self.emitter.cancel(item_id);

        let (item, snapshot) = {
            let mut state = self.lock_state();
            let item = state.registry.remove(item_id)?;
            state.barrier.discard_item(item_id);
            (item, recompute(&state.registry))
        };

        let _ = self.updates.send(TrackerEvent::ItemRemoved {
            item_id: item_id.to_string(),
        });

        self.coalescer.schedule(snapshot);
        self.coalescer.flush().await;

        info!(item_id, "removed knowledge item");
        Ok(item)
    }

    /// Copy another owner's entire knowledge snapshot into this one.
    ///
    /// All-or-nothing: every item is validated and re-keyed before any is
    /// inserted, so a failure leaves the destination unchanged. Imported
    /// items arrive without progress simulation; anything non-terminal in
    /// the source snapshot lands as Failed. Returns the number of items
    /// imported, after persisting.
    pub async fn import_from(&self, source_agent_id: &str) -> TrackerResult<usize> {
        let record = self
            .entities
            .get_entity(source_agent_id)
            .await?
            .ok_or_else(|| {
                TrackerError::Import(format!("unknown source agent: {source_agent_id}"))
            })?;
        let source = record.knowledge.ok_or_else(|| {
            TrackerError::Import(format!("agent {source_agent_id} has no knowledge snapshot"))
        })?;

        let snapshot = {
            let mut state = self.lock_state();

            for item in &source.items {
                if let Some(url) = item.metadata.url() {
                    if state.registry.has_url(url) {
                        return Err(TrackerError::Import(format!(
                            "source snapshot collides with existing URL: {url}"
                        )));
                    }
                }
            }

            // Stage fully before touching the registry.
            let staged: Vec<KnowledgeItem> = source
                .items
                .iter()
                .map(|item| {
                    let mut copy = item.clone();
                    copy.id = format!("item_{}", uuid::Uuid::new_v4());
                    if !copy.status.is_terminal() {
                        copy.status = ItemStatus::Failed;
                        copy.progress = 100;
                    }
                    copy
                })
                .collect();

            for item in staged {
                state.registry.register(item)?;
            }
            recompute(&state.registry)
        };

        let imported = source.items.len();
        self.coalescer.schedule(snapshot);
        self.coalescer.flush().await;

        info!(
            source = source_agent_id,
            items = imported,
            "imported knowledge snapshot"
        );
        Ok(imported)
    }

    /// Restore the persisted snapshot from the backing store.
    ///
    /// Intended at session start, before any submission. In-flight jobs are
    /// never persisted state: a non-terminal item found on disk belongs to
    /// a crashed session and rehydrates as Failed. Returns the number of
    /// items restored.
    pub async fn load(&self) -> TrackerResult<usize> {
        let Some(raw) = self.store.load(&self.storage_key).await? else {
            return Ok(0);
        };
        let snapshot: KnowledgeSnapshot = serde_json::from_str(&raw)?;

        let mut state = self.lock_state();
        let mut restored = 0;
        // Snapshot order is newest-first with ties in insertion order, so
        // registering in list order preserves tie-breaks on recompute.
        for mut item in snapshot.items {
            if !item.status.is_terminal() {
                warn!(item_id = %item.id, "non-terminal item on disk, rehydrating as failed");
                item.status = ItemStatus::Failed;
                item.progress = 100;
            }
            state.registry.register(item)?;
            restored += 1;
        }

        info!(items = restored, "restored knowledge snapshot");
        Ok(restored)
    }

    /// Current merged view of all items.
    pub fn snapshot(&self) -> KnowledgeSnapshot {
        recompute(&self.lock_state().registry)
    }

    pub fn get(&self, item_id: &str) -> Option<KnowledgeItem> {
        self.lock_state().registry.get(item_id).cloned()
    }

    /// Force completion of any pending snapshot writes.
    pub async fn flush(&self) {
        self.coalescer.flush().await;
    }

    /// Error from the most recent persistence attempt, if its retry also
    /// failed. In-memory state stays authoritative while this is set.
    pub fn last_persist_error(&self) -> Option<String> {
        self.coalescer.last_error()
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for KnowledgeController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Single consumer of emitter events. Every event re-checks registry
/// membership, so a tick scheduled before a removal but delivered after is
/// a no-op.
async fn run_pump(
    mut events: mpsc::UnboundedReceiver<IngestEvent>,
    state: Arc<Mutex<TrackerState>>,
    coalescer: Arc<PersistenceCoalescer>,
    updates: broadcast::Sender<TrackerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            IngestEvent::Progress { item_id, delta } => {
                let published = {
                    let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
                    if !guard.registry.contains(&item_id) {
                        debug!(item_id = %item_id, "tick for removed item dropped");
                        None
                    } else {
                        guard
                            .registry
                            .update_progress(&item_id, delta)
                            .ok()
                            .and_then(|progress| {
                                guard
                                    .registry
                                    .get(&item_id)
                                    .map(|item| (item.status, progress))
                            })
                    }
                };
                if let Some((status, progress)) = published {
                    let _ = updates.send(TrackerEvent::ItemUpdated {
                        item_id,
                        status,
                        progress,
                    });
                }
            }
            IngestEvent::Terminal { item_id, outcome } => {
                let (changed, completed_batch) = {
                    let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
                    if !guard.registry.contains(&item_id) {
                        debug!(item_id = %item_id, "terminal event for removed item dropped");
                        (false, None)
                    } else {
                        let changed =
                            guard.registry.mark_terminal(&item_id, outcome).unwrap_or(false);
                        let completed = if changed {
                            guard.barrier.on_item_terminal(&item_id)
                        } else {
                            None
                        };
                        (changed, completed)
                    }
                };

                if changed {
                    let _ = updates.send(TrackerEvent::ItemUpdated {
                        item_id: item_id.clone(),
                        status: outcome.as_status(),
                        progress: 100,
                    });
                }
                if let Some(batch_id) = completed_batch {
                    info!(batch_id = %batch_id, "batch completed, scheduling snapshot write");
                    let snapshot = {
                        let guard = state.lock().unwrap_or_else(|p| p.into_inner());
                        recompute(&guard.registry)
                    };
                    // Scheduled before the event goes out, so a subscriber
                    // reacting with flush() always finds the write pending.
                    coalescer.schedule(snapshot);
                    let _ = updates.send(TrackerEvent::BatchCompleted { batch_id });
                }
            }
        }
    }
}
