//! Merged view over all tracked items.

use chrono::Utc;

use crate::models::KnowledgeSnapshot;
use crate::registry::JobRegistry;

/// Rebuild the snapshot from current registry state.
///
/// Pure function of the registry: merges items across all kinds, sorts by
/// `added_at` descending with insertion order breaking ties, and returns
/// the list plus a count. Safe to call on every mutation.
pub fn recompute(registry: &JobRegistry) -> KnowledgeSnapshot {
    let mut entries: Vec<_> = registry.entries().collect();
    entries.sort_by(|a, b| {
        b.item
            .added_at
            .cmp(&a.item.added_at)
            .then(a.seq.cmp(&b.seq))
    });

    let items: Vec<_> = entries.into_iter().map(|entry| entry.item.clone()).collect();
    let count = items.len();

    KnowledgeSnapshot {
        items,
        count,
        generated_at: Utc::now(),
    }
}
