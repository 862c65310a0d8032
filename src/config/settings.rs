use serde::Deserialize;

use super::hub::HubConfig;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listening server, the connection hub and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub log: LogSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to, and which browser
/// origins may connect. An empty `allowed_origins` allows every origin.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

/// Connection tuning for every client managed by the hub.
///
/// Durations are expressed in milliseconds so they can be set from plain
/// environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    pub write_wait_ms: u64,
    pub pong_wait_ms: u64,
    pub ping_period_ms: u64,
    pub max_message_size: usize,
    pub send_buffer_size: usize,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub write_wait_ms: Option<u64>,
    pub pong_wait_ms: Option<u64>,
    pub ping_period_ms: Option<u64>,
    pub max_message_size: Option<usize>,
    pub send_buffer_size: Option<usize>,
    pub read_buffer_size: Option<usize>,
    pub write_buffer_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl HubSettings {
    /// Converts the raw settings into a validated [`HubConfig`].
    pub fn to_hub_config(&self) -> crate::utils::error::Result<HubConfig> {
        let config = HubConfig {
            write_wait: std::time::Duration::from_millis(self.write_wait_ms),
            pong_wait: std::time::Duration::from_millis(self.pong_wait_ms),
            ping_period: std::time::Duration::from_millis(self.ping_period_ms),
            max_message_size: self.max_message_size,
            send_buffer_size: self.send_buffer_size,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Provides default values for `Settings`.
///
/// Hub defaults mirror [`HubConfig::default`].
impl Default for Settings {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                allowed_origins: Vec::new(),
            },
            hub: HubSettings {
                write_wait_ms: hub.write_wait.as_millis() as u64,
                pong_wait_ms: hub.pong_wait.as_millis() as u64,
                ping_period_ms: hub.ping_period.as_millis() as u64,
                max_message_size: hub.max_message_size,
                send_buffer_size: hub.send_buffer_size,
                read_buffer_size: hub.read_buffer_size,
                write_buffer_size: hub.write_buffer_size,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
