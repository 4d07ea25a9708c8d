use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";

/// Backoff policy between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the retry with 0-based index `retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_reconnect(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the server.
    pub server_url: String,
    /// Base URL for the REST history endpoints.
    pub api_url: String,
    pub user_id: String,
    pub connect_timeout_ms: u64,
    /// Deadline for each REST history request.
    pub request_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub pong_timeout_ms: u64,
    /// Consecutive `error` events that force a reconnect.
    pub error_threshold: u32,
    pub command_buffer: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            api_url: "http://127.0.0.1:8080".to_string(),
            user_id: String::new(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            heartbeat_interval_ms: 25_000,
            pong_timeout_ms: 10_000,
            error_threshold: 3,
            command_buffer: 64,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Runtime knobs for the reconnect controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub reconnect: ReconnectConfig,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub error_threshold: u32,
    pub command_buffer: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ClientConfig::default().controller_settings()
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            reconnect: self.reconnect,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
            pong_timeout: Duration::from_millis(self.pong_timeout_ms),
            error_threshold: self.error_threshold.max(1),
            command_buffer: self.command_buffer.max(1),
        }
    }
}

/// Load the config file, falling back to defaults when it is missing or invalid.
pub fn load_config(path: &str) -> ClientConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                ClientConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            ClientConfig::default()
        }
    }
}
