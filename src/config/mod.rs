mod hub;
mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use hub::HubConfig;
pub use settings::{HubSettings, LogSettings, ServerSettings, Settings};

#[cfg(test)]
mod tests;

/// Loads the configuration from the default file and environment variables
/// (`HUBCAST__SECTION__KEY`, lists comma separated), merged over
/// [`Settings::default`].
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("HUBCAST")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let server = partial.server.as_ref();
    let hub = partial.hub.as_ref();

    Ok(Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
            allowed_origins: server
                .and_then(|s| s.allowed_origins.clone())
                .unwrap_or(default.server.allowed_origins),
        },
        hub: HubSettings {
            write_wait_ms: hub
                .and_then(|h| h.write_wait_ms)
                .unwrap_or(default.hub.write_wait_ms),
            pong_wait_ms: hub
                .and_then(|h| h.pong_wait_ms)
                .unwrap_or(default.hub.pong_wait_ms),
            ping_period_ms: hub
                .and_then(|h| h.ping_period_ms)
                .unwrap_or(default.hub.ping_period_ms),
            max_message_size: hub
                .and_then(|h| h.max_message_size)
                .unwrap_or(default.hub.max_message_size),
            send_buffer_size: hub
                .and_then(|h| h.send_buffer_size)
                .unwrap_or(default.hub.send_buffer_size),
            read_buffer_size: hub
                .and_then(|h| h.read_buffer_size)
                .unwrap_or(default.hub.read_buffer_size),
            write_buffer_size: hub
                .and_then(|h| h.write_buffer_size)
                .unwrap_or(default.hub.write_buffer_size),
        },
        log: LogSettings {
            level: partial
                .log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    })
}
