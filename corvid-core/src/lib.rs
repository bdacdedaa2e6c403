//! Shared configuration for the corvid knowledge tracker.

pub mod config;

pub use config::{IngestSettings, Settings, SettingsError, load_dotenv};
