//! Configuration management for the face bridge.
//!
//! Loads and validates the YAML configuration file. Connection settings may
//! later be overridden by the settings cache (last-used values win over file
//! defaults).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub obs: ConnectionSettings,
    /// Scene holding the expression layers.
    #[serde(default = "default_scene")]
    pub scene: String,
    /// Detections below this confidence are ignored.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Bind address for the HTTP boundary.
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long a command arriving before initialization may wait.
    #[serde(default = "default_ready_grace_ms")]
    pub ready_grace_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty config must deserialize")
    }
}

/// obs-websocket endpoint and credentials
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
        }
    }
}

impl ConnectionSettings {
    /// The websocket URL for this endpoint. IPv6 hosts are bracketed.
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("ws://[{}]:{}", self.host, self.port)
        } else {
            format!("ws://{}:{}", self.host, self.port)
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists; fall back to defaults otherwise.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.obs.host.is_empty() {
            anyhow::bail!("obs.host cannot be empty");
        }
        if self.scene.is_empty() {
            anyhow::bail!("scene cannot be empty");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!(
                "min_confidence {} is invalid (must be 0.0-1.0)",
                self.min_confidence
            );
        }
        if self.call_timeout_ms == 0 {
            anyhow::bail!("call_timeout_ms cannot be zero");
        }
        Ok(())
    }
}

// Default value functions
fn default_obs_host() -> String { "localhost".to_string() }
fn default_obs_port() -> u16 { 4455 }
fn default_scene() -> String { "FaceScene".to_string() }
fn default_min_confidence() -> f64 { 0.5 }
fn default_http_listen() -> String { "127.0.0.1:8126".to_string() }
fn default_call_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_ready_grace_ms() -> u64 { 2000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.obs.host, "localhost");
        assert_eq!(config.obs.port, 4455);
        assert_eq!(config.scene, "FaceScene");
        assert_eq!(config.min_confidence, 0.5);
        config.validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "obs:\n  host: studio.local\n  password: hunter2\nscene: Reactions\n",
        )
        .unwrap();
        assert_eq!(config.obs.host, "studio.local");
        assert_eq!(config.obs.port, 4455);
        assert_eq!(config.obs.password.as_deref(), Some("hunter2"));
        assert_eq!(config.scene, "Reactions");
    }

    #[test]
    fn socket_address_brackets_ipv6_hosts() {
        let mut settings = ConnectionSettings::default();
        assert_eq!(settings.socket_address(), "ws://localhost:4455");

        settings.host = "::1".to_string();
        assert_eq!(settings.socket_address(), "ws://[::1]:4455");

        settings.host = "[fe80::1]".to_string();
        assert_eq!(settings.socket_address(), "ws://[fe80::1]:4455");
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let mut config = AppConfig::default();
        config.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_scene_is_rejected() {
        let mut config = AppConfig::default();
        config.scene = String::new();
        assert!(config.validate().is_err());
    }
}
