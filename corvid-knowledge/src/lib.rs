//! Knowledge-ingestion tracking for corvid agent configuration.
//!
//! Each content source an operator adds becomes a job; jobs emit progress
//! independently, a barrier detects when a whole submission batch is
//! terminal, and the resulting items are coalesced into one persisted
//! snapshot per agent.

pub mod aggregate;
pub mod barrier;
pub mod coalescer;
pub mod controller;
pub mod emitter;
pub mod errors;
pub mod models;
pub mod registry;
pub mod store;

pub use corvid_core::IngestSettings;
pub use controller::KnowledgeController;
pub use errors::{TrackerError, TrackerResult};
pub use models::{
    AgentPatch, AgentRecord, IngestEvent, ItemKind, ItemMetadata, ItemStatus, JobOutcome,
    KnowledgeItem, KnowledgeSnapshot, NewEntry, TrackerEvent,
};
pub use store::{BackingStore, EntityStore, FileStore, MemoryEntityStore, MemoryStore};
