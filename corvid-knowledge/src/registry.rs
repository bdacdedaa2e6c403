//! Authoritative map of item id → tracked state.
//!
//! The registry is a plain struct: the controller serializes all access
//! through one mutex, so no interior locking is needed. Progress only moves
//! forward — a tick against a terminal job is a no-op, never a regression
//! or a resumption.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::errors::{TrackerError, TrackerResult};
use crate::models::{ItemStatus, JobOutcome, KnowledgeItem, UploadJob};

#[derive(Debug, Clone)]
pub(crate) struct RegisteredItem {
    /// Insertion sequence, used as the stable tie-break when sorting.
    pub seq: u64,
    pub item: KnowledgeItem,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: HashMap<String, RegisteredItem>,
    jobs: HashMap<String, UploadJob>,
    next_seq: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new item with an in-flight job.
    pub fn register(&mut self, item: KnowledgeItem) -> TrackerResult<()> {
        if self.entries.contains_key(&item.id) {
            return Err(TrackerError::DuplicateId(item.id));
        }

        let id = item.id.clone();
        let terminal = item.status.is_terminal();
        let seq = self.next_seq;
        self.next_seq += 1;

        if !terminal {
            self.jobs.insert(
                id.clone(),
                UploadJob {
                    item_id: id.clone(),
                    progress: item.progress,
                    terminal: false,
                },
            );
        }
        self.entries.insert(id, RegisteredItem { seq, item });

        Ok(())
    }

    /// Apply a progress increment. In-flight progress tops out at 99; only
    /// the terminal transition reports 100. A tick for an already-terminal
    /// job is silently dropped.
    ///
    /// The first applied tick moves the item Queued → Processing.
    pub fn update_progress(&mut self, item_id: &str, delta: u8) -> TrackerResult<u8> {
        let entry = self
            .entries
            .get_mut(item_id)
            .ok_or_else(|| TrackerError::UnknownJob(item_id.to_string()))?;

        let Some(job) = self.jobs.get_mut(item_id) else {
            // Job already discarded (terminal); nothing to resume.
            debug!(item_id, "progress tick for terminal job dropped");
            return Ok(entry.item.progress);
        };
        if job.terminal {
            return Ok(job.progress);
        }

        job.progress = job.progress.saturating_add(delta).min(99);
        entry.item.progress = job.progress;
        if entry.item.status == ItemStatus::Queued {
            entry.item.status = ItemStatus::Processing;
        }

        Ok(job.progress)
    }

    /// Record the terminal outcome for an item. Idempotent: repeated calls
    /// after the first change nothing. Pins progress to 100 and stamps the
    /// completion time; the in-flight job is discarded.
    pub fn mark_terminal(&mut self, item_id: &str, outcome: JobOutcome) -> TrackerResult<bool> {
        let entry = self
            .entries
            .get_mut(item_id)
            .ok_or_else(|| TrackerError::UnknownJob(item_id.to_string()))?;

        if entry.item.status.is_terminal() {
            return Ok(false);
        }

        entry.item.status = outcome.as_status();
        entry.item.progress = 100;
        entry.item.completed_at = Some(Utc::now());
        self.jobs.remove(item_id);

        Ok(true)
    }

    /// Delete an item in any state. Returns the removed item.
    pub fn remove(&mut self, item_id: &str) -> TrackerResult<KnowledgeItem> {
        self.jobs.remove(item_id);
        self.entries
            .remove(item_id)
            .map(|entry| entry.item)
            .ok_or_else(|| TrackerError::UnknownJob(item_id.to_string()))
    }

    pub fn get(&self, item_id: &str) -> Option<&KnowledgeItem> {
        self.entries.get(item_id).map(|entry| &entry.item)
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &RegisteredItem> {
        self.entries.values()
    }

    /// Whether any registered web page already uses this URL.
    pub fn has_url(&self, url: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.item.metadata.url() == Some(url))
    }
}
