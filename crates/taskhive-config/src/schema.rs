//! Configuration schema definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use taskhive_queue::QueueConfig;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where task state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// No persistence; tasks live only in memory.
    None,
    /// In-process map; lost on exit.
    Memory,
    /// One JSON file per task.
    #[default]
    File,
    /// SQLite database file.
    Sqlite,
}

impl StoreBackend {
    pub const NAMES: [&'static str; 4] = ["none", "memory", "file", "sqlite"];

    pub fn as_str(self) -> &'static str {
        match self {
            StoreBackend::None => "none",
            StoreBackend::Memory => "memory",
            StoreBackend::File => "file",
            StoreBackend::Sqlite => "sqlite",
        }
    }

    /// Whether the backend keeps tasks across restarts.
    pub fn is_durable(self) -> bool {
        matches!(self, StoreBackend::File | StoreBackend::Sqlite)
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Storage directory (file) or database file (sqlite). `~` is expanded.
    #[serde(default)]
    pub path: Option<String>,
}

impl PersistenceConfig {
    /// Configured path with `~` expanded, or the default location for the backend.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(shellexpand::tilde(path).as_ref()),
            None => {
                let base = default_data_dir();
                match self.backend {
                    StoreBackend::Sqlite => base.join("tasks.db"),
                    _ => base.join("queue"),
                }
            }
        }
    }
}

/// Default data directory: `~/.taskhive`.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskhive")
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<String>,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            json: false,
        }
    }
}

impl LoggingConfig {
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).as_ref()))
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
