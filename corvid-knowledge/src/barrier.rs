//! Batch completion detection.
//!
//! Each user-initiated submission opens one batch with its own membership
//! set; the UI auto-saves once per batch, not once per item. An item
//! belongs to at most one open batch, and a submission arriving while an
//! earlier batch is still open gets an independent batch of its own.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Pending membership set for one submission.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub pending: HashSet<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct BatchBarrier {
    batches: HashMap<String, Batch>,
    /// item id → owning batch id.
    membership: HashMap<String, String>,
}

impl BatchBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending membership set. Returns the batch id.
    pub fn open_batch(&mut self, item_ids: impl IntoIterator<Item = String>) -> String {
        let batch_id = format!("batch_{}", Uuid::new_v4());
        let pending: HashSet<String> = item_ids.into_iter().collect();

        for item_id in &pending {
            self.membership.insert(item_id.clone(), batch_id.clone());
        }
        self.batches.insert(
            batch_id.clone(),
            Batch {
                batch_id: batch_id.clone(),
                pending,
                created_at: Utc::now(),
            },
        );

        batch_id
    }

    /// Mark one item terminal. When this empties its batch's pending set,
    /// the batch is destroyed and its id returned — exactly once per batch.
    pub fn on_item_terminal(&mut self, item_id: &str) -> Option<String> {
        let batch_id = self.membership.remove(item_id)?;
        let batch = self.batches.get_mut(&batch_id)?;

        batch.pending.remove(item_id);
        if batch.pending.is_empty() {
            self.batches.remove(&batch_id);
            return Some(batch_id);
        }
        None
    }

    /// Drop an item from its batch without completion semantics (removal
    /// path). A batch emptied this way is discarded silently: the removal
    /// already forces its own persist.
    pub fn discard_item(&mut self, item_id: &str) {
        let Some(batch_id) = self.membership.remove(item_id) else {
            return;
        };
        let Some(batch) = self.batches.get_mut(&batch_id) else {
            return;
        };

        batch.pending.remove(item_id);
        if batch.pending.is_empty() {
            debug!(batch_id = %batch_id, "batch emptied by removals, dropped");
            self.batches.remove(&batch_id);
        }
    }

    pub fn open_batch_count(&self) -> usize {
        self.batches.len()
    }
}
