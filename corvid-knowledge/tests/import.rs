use std::sync::Arc;

use chrono::Utc;

use corvid_knowledge::models::{
    AgentRecord, ItemKind, ItemMetadata, ItemStatus, KnowledgeItem, KnowledgeSnapshot, NewEntry,
};
use corvid_knowledge::store::{BackingStore, MemoryEntityStore, MemoryStore};
use corvid_knowledge::{IngestSettings, KnowledgeController, TrackerError};

fn fast_settings() -> IngestSettings {
    IngestSettings {
        tick_interval_ms: 1,
        debounce_ms: 0,
        rng_seed: Some(11),
        ..Default::default()
    }
}

fn completed_item(name: &str, metadata: ItemMetadata) -> KnowledgeItem {
    let mut item = KnowledgeItem::new(name, metadata);
    item.status = ItemStatus::Completed;
    item.progress = 100;
    item.completed_at = Some(Utc::now());
    item
}

fn snapshot_from(items: Vec<KnowledgeItem>) -> KnowledgeSnapshot {
    KnowledgeSnapshot {
        count: items.len(),
        items,
        generated_at: Utc::now(),
    }
}

async fn seeded_entities(source_items: Vec<KnowledgeItem>) -> Arc<MemoryEntityStore> {
    let entities = MemoryEntityStore::new();
    entities
        .insert(AgentRecord {
            id: "agent-src".to_string(),
            name: "source".to_string(),
            knowledge: Some(snapshot_from(source_items)),
        })
        .await;
    entities
}

#[tokio::test]
async fn test_import_copies_all_items_and_persists() {
    let store = MemoryStore::new();
    let entities = seeded_entities(vec![
        completed_item(
            "guide.pdf",
            ItemMetadata::Document {
                size_bytes: 2048,
                content_type: "application/pdf".to_string(),
            },
        ),
        completed_item(
            "faq",
            ItemMetadata::Qa {
                question: "q".to_string(),
                answer: "a".to_string(),
            },
        ),
    ])
    .await;
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store.clone(), entities);

    let imported = controller.import_from("agent-src").await.unwrap();
    assert_eq!(imported, 2);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 2);
    for item in &snapshot.items {
        assert_eq!(item.status, ItemStatus::Completed);
    }

    // Already persisted by the time import returns.
    let raw = store.load("knowledge:agent-dst").await.unwrap().unwrap();
    let persisted: KnowledgeSnapshot = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted.count, 2);
}

#[tokio::test]
async fn test_import_rekeys_items() {
    let source_item = completed_item(
        "note",
        ItemMetadata::Text {
            content: "body".to_string(),
        },
    );
    let source_id = source_item.id.clone();
    let store = MemoryStore::new();
    let entities = seeded_entities(vec![source_item]).await;
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store, entities);

    controller.import_from("agent-src").await.unwrap();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 1);
    // Fresh id in the destination, so a re-import cannot collide.
    assert_ne!(snapshot.items[0].id, source_id);
}

#[tokio::test]
async fn test_import_from_unknown_agent_fails() {
    let store = MemoryStore::new();
    let entities = MemoryEntityStore::new();
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store, entities);

    let err = controller.import_from("agent-ghost").await.unwrap_err();
    assert!(matches!(err, TrackerError::Import(_)));
}

#[tokio::test]
async fn test_import_without_snapshot_fails() {
    let store = MemoryStore::new();
    let entities = MemoryEntityStore::new();
    entities
        .insert(AgentRecord {
            id: "agent-src".to_string(),
            name: "source".to_string(),
            knowledge: None,
        })
        .await;
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store, entities);

    let err = controller.import_from("agent-src").await.unwrap_err();
    assert!(matches!(err, TrackerError::Import(_)));
}

#[tokio::test]
async fn test_import_url_collision_is_all_or_nothing() {
    let store = MemoryStore::new();
    let entities = seeded_entities(vec![
        completed_item(
            "fresh",
            ItemMetadata::Text {
                content: "ok".to_string(),
            },
        ),
        completed_item(
            "docs",
            ItemMetadata::WebPage {
                url: "https://example.com/docs".to_string(),
                page_count: None,
            },
        ),
    ])
    .await;
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store, entities.clone());

    // Destination already tracks the colliding URL.
    let mut rx = controller.subscribe();
    let batch_id = controller
        .submit(ItemKind::WebPage, vec![NewEntry {
            display_name: "docs".to_string(),
            metadata: ItemMetadata::WebPage {
                url: "https://example.com/docs".to_string(),
                page_count: None,
            },
        }])
        .unwrap();
    loop {
        if let Ok(corvid_knowledge::TrackerEvent::BatchCompleted { batch_id: id }) =
            rx.recv().await
        {
            if id == batch_id {
                break;
            }
        }
    }

    let err = controller.import_from("agent-src").await.unwrap_err();
    assert!(matches!(err, TrackerError::Import(_)));
    // Destination unchanged: only its own item, nothing from the source.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.items[0].display_name, "docs");
}

#[tokio::test]
async fn test_import_marks_non_terminal_source_items_failed() {
    let mut stalled = KnowledgeItem::new(
        "stalled",
        ItemMetadata::Text {
            content: "half done".to_string(),
        },
    );
    stalled.status = ItemStatus::Processing;
    stalled.progress = 40;

    let store = MemoryStore::new();
    let entities = seeded_entities(vec![stalled]).await;
    let controller =
        KnowledgeController::new("agent-dst", fast_settings(), store, entities);

    controller.import_from("agent-src").await.unwrap();
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.items[0].status, ItemStatus::Failed);
    assert_eq!(snapshot.items[0].progress, 100);
}

#[tokio::test]
async fn test_load_restores_persisted_snapshot() {
    let store = MemoryStore::new();
    let entities = MemoryEntityStore::new();

    {
        let controller = KnowledgeController::new(
            "agent-1",
            fast_settings(),
            store.clone(),
            entities.clone(),
        );
        let mut rx = controller.subscribe();
        let batch_id = controller
            .submit(ItemKind::Text, vec![NewEntry {
                display_name: "note".to_string(),
                metadata: ItemMetadata::Text {
                    content: "body".to_string(),
                },
            }])
            .unwrap();
        loop {
            if let Ok(corvid_knowledge::TrackerEvent::BatchCompleted { batch_id: id }) =
                rx.recv().await
            {
                if id == batch_id {
                    break;
                }
            }
        }
        controller.flush().await;
    }

    // New session over the same store.
    let controller =
        KnowledgeController::new("agent-1", fast_settings(), store, entities);
    let restored = controller.load().await.unwrap();
    assert_eq!(restored, 1);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.items[0].display_name, "note");
    assert!(snapshot.items[0].status.is_terminal());
}

#[tokio::test]
async fn test_load_empty_store_is_noop() {
    let store = MemoryStore::new();
    let entities = MemoryEntityStore::new();
    let controller =
        KnowledgeController::new("agent-1", fast_settings(), store, entities);

    assert_eq!(controller.load().await.unwrap(), 0);
    assert_eq!(controller.snapshot().count, 0);
}
