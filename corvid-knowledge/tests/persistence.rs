use corvid_knowledge::models::{ItemKind, ItemMetadata, NewEntry, TrackerEvent};
use corvid_knowledge::store::{BackingStore, FlakyStore, MemoryEntityStore};
use corvid_knowledge::{IngestSettings, KnowledgeController};

fn fast_settings() -> IngestSettings {
    IngestSettings {
        tick_interval_ms: 1,
        debounce_ms: 0,
        rng_seed: Some(3),
        ..Default::default()
    }
}

fn text_entry(name: &str) -> NewEntry {
    NewEntry {
        display_name: name.to_string(),
        metadata: ItemMetadata::Text {
            content: name.to_string(),
        },
    }
}

#[tokio::test]
async fn test_double_write_failure_surfaces_then_clears() {
    // First write and its retry both fail.
    let store = FlakyStore::new(2);
    let entities = MemoryEntityStore::new();
    let controller =
        KnowledgeController::new("agent-1", fast_settings(), store.clone(), entities);
    let mut rx = controller.subscribe();

    let batch_id = controller
        .submit(ItemKind::Text, vec![text_entry("note")])
        .unwrap();
    loop {
        if let Ok(TrackerEvent::BatchCompleted { batch_id: id }) = rx.recv().await {
            if id == batch_id {
                break;
            }
        }
    }
    controller.flush().await;

    // Non-fatal notice; in-memory state stays authoritative.
    assert!(controller.last_persist_error().is_some());
    assert_eq!(controller.snapshot().count, 1);
    assert!(store.load("knowledge:agent-1").await.unwrap().is_none());

    // The next successful write recovers and clears the notice.
    let item_id = controller.snapshot().items[0].id.clone();
    controller.remove(&item_id).await.unwrap();
    assert!(controller.last_persist_error().is_none());
    assert!(store.load("knowledge:agent-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_single_write_failure_recovers_via_retry() {
    let store = FlakyStore::new(1);
    let entities = MemoryEntityStore::new();
    let controller =
        KnowledgeController::new("agent-1", fast_settings(), store.clone(), entities);
    let mut rx = controller.subscribe();

    let batch_id = controller
        .submit(ItemKind::Text, vec![text_entry("note")])
        .unwrap();
    loop {
        if let Ok(TrackerEvent::BatchCompleted { batch_id: id }) = rx.recv().await {
            if id == batch_id {
                break;
            }
        }
    }
    controller.flush().await;

    assert!(controller.last_persist_error().is_none());
    assert!(store.load("knowledge:agent-1").await.unwrap().is_some());
    assert_eq!(*store.attempts.lock().await, 2);
}
