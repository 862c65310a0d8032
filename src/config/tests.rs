use std::env;
use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::settings::Settings;
use super::{HubConfig, load_config};
use crate::utils::error::HubError;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert!(settings.server.allowed_origins.is_empty());
    assert_eq!(settings.hub.write_wait_ms, 10_000);
    assert_eq!(settings.hub.pong_wait_ms, 60_000);
    assert_eq!(settings.hub.ping_period_ms, 54_000);
    assert_eq!(settings.hub.send_buffer_size, 256);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn default_settings_convert_to_default_hub_config() {
    let config = Settings::default().hub.to_hub_config().unwrap();
    assert_eq!(config, HubConfig::default());
}

#[test]
fn ping_period_must_be_shorter_than_pong_wait() {
    let config = HubConfig {
        ping_period: Duration::from_secs(60),
        pong_wait: Duration::from_secs(60),
        ..HubConfig::default()
    };
    assert!(matches!(config.validate(), Err(HubError::InvalidConfig(_))));
}

#[test]
fn zero_send_buffer_is_rejected() {
    let mut settings = Settings::default();
    settings.hub.send_buffer_size = 0;
    let err = settings.hub.to_hub_config().unwrap_err();
    assert!(err.to_string().contains("send_buffer_size"));
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // Create a temporary directory and set it as current dir so load_config
    // will pick up config/default.toml from there.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [hub]
        send_buffer_size = 16
        ping_period_ms = 500
        pong_wait_ms = 1000
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.hub.send_buffer_size, 16);
    assert_eq!(cfg.hub.ping_period_ms, 500);
    assert_eq!(cfg.hub.pong_wait_ms, 1000);
    // untouched keys keep their defaults
    assert_eq!(cfg.hub.write_wait_ms, 10_000);
    assert_eq!(cfg.log.level, "info");
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("HUBCAST__SERVER__PORT", Some("9100")),
            ("HUBCAST__LOG__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn allowed_origins_from_environment_list() {
    temp_env::with_var(
        "HUBCAST__SERVER__ALLOWED_ORIGINS",
        Some("https://app.example.com,https://admin.example.com"),
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(
                cfg.server.allowed_origins,
                vec!["https://app.example.com", "https://admin.example.com"]
            );
        },
    );
}
