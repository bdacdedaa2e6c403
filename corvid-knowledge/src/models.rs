use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of content source behind a knowledge item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Document,
    WebPage,
    Text,
    Qa,
    Image,
}

impl ItemKind {
    /// Storage string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::WebPage => "web_page",
            Self::Text => "text",
            Self::Qa => "qa",
            Self::Image => "image",
        }
    }
}

impl FromStr for ItemKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "web_page" => Ok(Self::WebPage),
            "text" => Ok(Self::Text),
            "qa" => Ok(Self::Qa),
            "image" => Ok(Self::Image),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a knowledge item.
///
/// Status only advances forward: Queued → Processing → Completed/Failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ItemStatus {
    /// Whether no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal resolution of an ingestion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

impl JobOutcome {
    pub fn as_status(&self) -> ItemStatus {
        match self {
            Self::Completed => ItemStatus::Completed,
            Self::Failed => ItemStatus::Failed,
        }
    }
}

/// Kind-specific payload of a knowledge item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemMetadata {
    Document {
        size_bytes: u64,
        content_type: String,
    },
    WebPage {
        url: String,
        page_count: Option<u32>,
    },
    Text {
        content: String,
    },
    Qa {
        question: String,
        answer: String,
    },
    Image {
        preview: Option<String>,
        size_bytes: u64,
    },
}

impl ItemMetadata {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Document { .. } => ItemKind::Document,
            Self::WebPage { .. } => ItemKind::WebPage,
            Self::Text { .. } => ItemKind::Text,
            Self::Qa { .. } => ItemKind::Qa,
            Self::Image { .. } => ItemKind::Image,
        }
    }

    /// URL of a web page source, if this is one.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::WebPage { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// One tracked knowledge item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub display_name: String,
    pub added_at: DateTime<Utc>,
    pub status: ItemStatus,
    /// Ingestion progress in [0,100]; equals 100 exactly when terminal.
    pub progress: u8,
    pub metadata: ItemMetadata,
    pub completed_at: Option<DateTime<Utc>>,
}

impl KnowledgeItem {
    /// Create a fresh Queued item with a generated id.
    pub fn new(display_name: impl Into<String>, metadata: ItemMetadata) -> Self {
        Self {
            id: format!("item_{}", Uuid::new_v4()),
            display_name: display_name.into(),
            added_at: Utc::now(),
            status: ItemStatus::Queued,
            progress: 0,
            metadata,
            completed_at: None,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.metadata.kind()
    }
}

/// Submission input for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntry {
    pub display_name: String,
    pub metadata: ItemMetadata,
}

/// In-flight ingestion job. Exists only while the item is non-terminal;
/// discarded once the terminal state is recorded.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub item_id: String,
    /// Monotonically non-decreasing; tops out at 99 while in flight.
    pub progress: u8,
    pub terminal: bool,
}

/// Complete, ordered point-in-time view of all knowledge items.
///
/// Rebuilt on every aggregate change, never mutated in place. Items are
/// ordered by `added_at` descending; ties keep insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    pub items: Vec<KnowledgeItem>,
    pub count: usize,
    pub generated_at: DateTime<Utc>,
}

impl KnowledgeSnapshot {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            generated_at: Utc::now(),
        }
    }
}

/// Owning agent record as stored in the entity store. The knowledge
/// snapshot is one field of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub knowledge: Option<KnowledgeSnapshot>,
}

/// Partial update of an agent record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPatch {
    #[serde(default)]
    pub knowledge: Option<KnowledgeSnapshot>,
}

/// State republication for UI subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    ItemUpdated {
        item_id: String,
        status: ItemStatus,
        progress: u8,
    },
    ItemRemoved {
        item_id: String,
    },
    BatchCompleted {
        batch_id: String,
    },
}

/// Message from the progress scheduler to the tracking core.
///
/// A real ingestion backend can feed these via webhook or poll instead of
/// the built-in timer simulation.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Progress { item_id: String, delta: u8 },
    Terminal { item_id: String, outcome: JobOutcome },
}
