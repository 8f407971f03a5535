//! Document storage configuration.

use serde::{Deserialize, Serialize};

use crate::application::services::CollectionNames;

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local store; contents are lost on exit.
    Memory,
    /// Embedded Turso database file.
    #[default]
    Turso,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file path for the `turso` backend.
    #[serde(default = "default_path")]
    pub path: String,
    /// Collection written in upsert mode.
    #[serde(default = "default_current_collection")]
    pub current_collection: String,
    /// Collection written in historical mode.
    #[serde(default = "default_history_collection")]
    pub history_collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_path(),
            current_collection: default_current_collection(),
            history_collection: default_history_collection(),
        }
    }
}

impl StorageConfig {
    /// Collection names for the storage and query engines.
    #[must_use]
    pub fn collections(&self) -> CollectionNames {
        CollectionNames {
            current: self.current_collection.clone(),
            history: self.history_collection.clone(),
        }
    }
}

fn default_path() -> String {
    "data/market-snapshots.db".to_string()
}

fn default_current_collection() -> String {
    "snapshots".to_string()
}

fn default_history_collection() -> String {
    "snapshot_history".to_string()
}
