//! External persistence seams.
//!
//! Both stores are collaborators of the tracker, not part of it: the
//! backing store is an opaque string-keyed key-value namespace, the entity
//! store holds the owning agent record. No network calls are made by this
//! subsystem; the in-memory implementations back tests and local sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::{TrackerError, TrackerResult};
use crate::models::{AgentPatch, AgentRecord};

/// Opaque key-value persistence. A save is all-or-nothing from the
/// caller's view.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn load(&self, key: &str) -> TrackerResult<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> TrackerResult<()>;
}

/// Entity store for agent records. Cross-owner import reads via
/// `get_entity` only.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, id: &str) -> TrackerResult<Option<AgentRecord>>;
    async fn update_entity(&self, id: &str, patch: AgentPatch) -> TrackerResult<()>;
}

/// HashMap-backed store for tests and local sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn load(&self, key: &str) -> TrackerResult<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> TrackerResult<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// HashMap-backed entity store.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    records: Mutex<HashMap<String, AgentRecord>>,
}

impl MemoryEntityStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a record, replacing any existing one with the same id.
    pub async fn insert(&self, record: AgentRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get_entity(&self, id: &str) -> TrackerResult<Option<AgentRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn update_entity(&self, id: &str, patch: AgentPatch) -> TrackerResult<()> {
        let mut records = self.records.lock().await;
        match records.get_mut(id) {
            Some(record) => {
                if let Some(snapshot) = patch.knowledge {
                    record.knowledge = Some(snapshot);
                }
                Ok(())
            }
            None => {
                // First write for this agent creates the record.
                records.insert(
                    id.to_string(),
                    AgentRecord {
                        id: id.to_string(),
                        name: id.to_string(),
                        knowledge: patch.knowledge,
                    },
                );
                Ok(())
            }
        }
    }
}

/// Directory-backed store: one file per key under the root.
///
/// Keys are sanitized into filenames, so the namespace stays opaque to the
/// caller. Good enough for local sessions; real deployments provide their
/// own `BackingStore`.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { root: root.into() })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.root.join(format!("{name}.json"))
    }
}

#[async_trait]
impl BackingStore for FileStore {
    async fn load(&self, key: &str) -> TrackerResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Persistence(format!("read {key}: {e}"))),
        }
    }

    async fn save(&self, key: &str, value: &str) -> TrackerResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| TrackerError::Persistence(format!("mkdir {}: {e}", self.root.display())))?;
        tokio::fs::write(self.path_for(key), value)
            .await
            .map_err(|e| TrackerError::Persistence(format!("write {key}: {e}")))
    }
}

/// Store wrapper that fails every save a configured number of times.
/// Test collaborator for exercising the retry path.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failures_left: Mutex<u32>,
    pub attempts: Mutex<u32>,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            failures_left: Mutex::new(failures),
            attempts: Mutex::new(0),
        })
    }
}

#[async_trait]
impl BackingStore for FlakyStore {
    async fn load(&self, key: &str) -> TrackerResult<Option<String>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, value: &str) -> TrackerResult<()> {
        *self.attempts.lock().await += 1;
        let mut left = self.failures_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(TrackerError::Persistence("simulated write failure".into()));
        }
        drop(left);
        self.inner.save(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("k").await.unwrap().is_none());
        store.save("k", "v").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_entity_store_patch_creates_and_updates() {
        let store = MemoryEntityStore::new();
        store
            .update_entity("agent-1", AgentPatch::default())
            .await
            .unwrap();
        let record = store.get_entity("agent-1").await.unwrap().unwrap();
        assert!(record.knowledge.is_none());

        store
            .update_entity(
                "agent-1",
                AgentPatch {
                    knowledge: Some(crate::models::KnowledgeSnapshot::empty()),
                },
            )
            .await
            .unwrap();
        let record = store.get_entity("agent-1").await.unwrap().unwrap();
        assert!(record.knowledge.is_some());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_missing_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(dir.path());

        assert!(store.load("knowledge:agent-1").await.unwrap().is_none());
        store.save("knowledge:agent-1", "{}").await.unwrap();
        assert_eq!(
            store.load("knowledge:agent-1").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn test_flaky_store_recovers() {
        let store = FlakyStore::new(1);
        assert!(store.save("k", "v1").await.is_err());
        store.save("k", "v2").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(*store.attempts.lock().await, 2);
    }
}
