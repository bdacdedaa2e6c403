//! Configuration management for corvid.
//!
//! Settings are loaded from a TOML file under the XDG config directory
//! (`~/.config/corvid/config.toml`), with `CORVID_CONFIG_DIR` overriding
//! the directory for tests and packaging. Every field carries a serde
//! default so a partial file (or an empty one) resolves cleanly.
//!
//! ```toml
//! [ingest]
//! tick_interval_ms = 150
//! step_min = 1
//! step_max = 15
//! failure_rate = 0.0
//! debounce_ms = 200
//! storage_key_prefix = "knowledge"
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub ingest: IngestSettings,
}

/// Resolved ingestion-tracker settings (all values filled with defaults).
///
/// Intervals are milliseconds. `rng_seed` pins the progress simulation to a
/// deterministic sequence; leave unset outside of tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Delay between simulated progress ticks for one job.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Smallest progress increment per tick.
    #[serde(default = "default_step_min")]
    pub step_min: u8,
    /// Largest progress increment per tick.
    #[serde(default = "default_step_max")]
    pub step_max: u8,
    /// Probability in [0,1] that a job resolves Failed instead of Completed.
    #[serde(default)]
    pub failure_rate: f64,
    /// Quiet window before a scheduled snapshot write actually starts.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Prefix for backing-store keys; the agent id is appended.
    #[serde(default = "default_storage_key_prefix")]
    pub storage_key_prefix: String,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            step_min: default_step_min(),
            step_max: default_step_max(),
            failure_rate: 0.0,
            debounce_ms: default_debounce_ms(),
            storage_key_prefix: default_storage_key_prefix(),
            rng_seed: None,
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    150
}

fn default_step_min() -> u8 {
    1
}

fn default_step_max() -> u8 {
    15
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_storage_key_prefix() -> String {
    "knowledge".to_string()
}

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# corvid configuration file
# Located at: ~/.config/corvid/config.toml
#
# All values are optional; missing fields fall back to built-in defaults.

[ingest]
# Delay between simulated progress ticks for one job (milliseconds)
tick_interval_ms = 150
# Bounds for the random progress increment per tick
step_min = 1
step_max = 15
# Probability that a job resolves Failed instead of Completed
failure_rate = 0.0
# Quiet window before a scheduled snapshot write starts (milliseconds)
debounce_ms = 200
# Backing-store key prefix; the agent id is appended
storage_key_prefix = "knowledge"
"#;

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    /// The file is located at `~/.config/corvid/config.toml`.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// Uses XDG config directory: `~/.config/corvid/config.toml`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("CORVID_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("corvid");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, DEFAULT_CONFIG_TOML)?;

        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Load environment variables from a `.env` file if present.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
