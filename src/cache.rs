//! Durable key-value store for the last-used settings.
//!
//! A single pretty-printed JSON file. Reads never fail: a missing file is an
//! empty cache and a corrupt one is discarded with a warning, so a bad write
//! can only ever cost the saved settings, never startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

/// Cache key for the obs-websocket connection settings.
pub const CONNECTION_KEY: &str = "obs_connection";

pub struct SettingsCache {
    path: PathBuf,
    entries: parking_lot::Mutex<HashMap<String, Value>>,
}

impl SettingsCache {
    /// Open the cache at `path`, loading whatever is already there.
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path).await {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(entries) => {
                    debug!("Loaded settings cache from {}", path.display());
                    entries
                },
                Err(e) => {
                    warn!(
                        "Settings cache {} is corrupt ({}); starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                },
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: parking_lot::Mutex::new(entries),
        }
    }

    /// Default cache location under the platform config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("face-bridge")
            .join("settings.json")
    }

    /// Read a value, or None when absent or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.lock().get(key)?.clone();
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cached value for '{}' has an unexpected shape: {}", key, e);
                None
            },
        }
    }

    /// Store a value and persist the whole cache.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json_value =
            serde_json::to_value(value).context("Failed to serialize cache value")?;
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.insert(key.to_string(), json_value);
            entries.clone()
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize settings cache")?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        debug!("Settings cache updated ({})", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;
    use tempfile::tempdir;

    #[tokio::test]
    async fn settings_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = ConnectionSettings {
            host: "studio.local".to_string(),
            port: 4466,
            password: Some("hunter2".to_string()),
        };

        let cache = SettingsCache::open(&path).await;
        cache.set(CONNECTION_KEY, &settings).await.unwrap();

        // A fresh instance sees what the first one wrote.
        let reopened = SettingsCache::open(&path).await;
        let loaded: ConnectionSettings = reopened.get(CONNECTION_KEY).unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_cache() {
        let dir = tempdir().unwrap();
        let cache = SettingsCache::open(dir.path().join("nope.json")).await;
        assert!(cache.get::<ConnectionSettings>(CONNECTION_KEY).is_none());
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let cache = SettingsCache::open(&path).await;
        assert!(cache.get::<ConnectionSettings>(CONNECTION_KEY).is_none());

        // Still writable after the bad read.
        cache
            .set(CONNECTION_KEY, &ConnectionSettings::default())
            .await
            .unwrap();
        let reopened = SettingsCache::open(&path).await;
        assert!(reopened.get::<ConnectionSettings>(CONNECTION_KEY).is_some());
    }

    #[tokio::test]
    async fn wrong_shape_reads_as_none() {
        let dir = tempdir().unwrap();
        let cache = SettingsCache::open(dir.path().join("settings.json")).await;
        cache.set("answer", &42u32).await.unwrap();
        assert!(cache.get::<ConnectionSettings>("answer").is_none());
        assert_eq!(cache.get::<u32>("answer"), Some(42));
    }

    #[tokio::test]
    async fn parent_directories_are_created_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deep").join("nested").join("settings.json");
        let cache = SettingsCache::open(&path).await;
        cache.set("answer", &1u32).await.unwrap();
        assert!(path.exists());
    }
}
