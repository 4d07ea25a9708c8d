use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::messaging::HubSettings;
use crate::presence::LivenessSettings;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    /// Grace period for a new socket to send `authenticate`.
    pub auth_timeout_secs: u64,
    /// Events queued per connection before pushes start failing.
    pub outbox_capacity: usize,
    /// Per-frame write deadline on the socket.
    pub send_timeout_ms: u64,
    pub max_content_len: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            database_path: "data/messages.db".to_string(),
            ping_interval_secs: 30,
            ping_timeout_secs: 60,
            auth_timeout_secs: 10,
            outbox_capacity: 64,
            send_timeout_ms: 10_000,
            max_content_len: 4_000,
            default_page_size: 50,
            max_page_size: 200,
            stats_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn liveness(&self) -> LivenessSettings {
        LivenessSettings {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            ping_timeout: Duration::from_secs(self.ping_timeout_secs),
            auth_timeout: Duration::from_secs(self.auth_timeout_secs.max(1)),
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            liveness: self.liveness(),
            max_content_len: self.max_content_len,
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

/// Load the config file, falling back to defaults when it is missing or invalid.
pub fn load_config(path: &str) -> ServerConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ServerConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ServerConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ServerConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &ServerConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config("/definitely/not/here.json");
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.liveness(), LivenessSettings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{"bind_addr": "0.0.0.0:9000", "ping_timeout_secs": 90}"#).unwrap();

        let config = load_config(path.to_str().unwrap());
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.liveness().ping_timeout, Duration::from_secs(90));
        assert_eq!(config.outbox_capacity, 64);
    }

    #[test]
    fn invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config(path.to_str().unwrap()), ServerConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/server.json");
        let path = path.to_str().unwrap();
        let config = ServerConfig {
            max_content_len: 10,
            ..ServerConfig::default()
        };

        save_config(path, &config).unwrap();
        assert_eq!(load_config(path), config);
    }
}
