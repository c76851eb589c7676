//! Core infrastructure tests.

mod common;

use cabinet::core::config::{Config, ConfigOverrides};
use cabinet::core::error::CabinetError;
use std::path::Path;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_minimal_config() {
    let file = common::create_minimal_config();
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:0");
    assert!(!config.server.optimize);
    assert!(config.storage.path.is_none());
    assert_eq!(config.client.drain_timeout_ms, 120_000);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn parse_full_config() {
    let file = common::create_config(
        r#"
[server]
bind = "0.0.0.0:9000"
optimize = true
allow = ["10.0.0.1", "::1"]
max_frame_bytes = 1048576

[storage]
path = "/var/lib/cabinet/store.log"

[client]
optimize = true
drain_timeout_ms = 500
request_timeout_ms = 2000

[telemetry]
log_level = "debug"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.server.optimize);
    assert_eq!(config.server.allow.len(), 2);
    assert_eq!(config.server.max_frame_bytes, 1_048_576);
    assert_eq!(
        config.storage.path.as_deref(),
        Some("/var/lib/cabinet/store.log")
    );
    assert_eq!(config.client.drain_timeout().as_millis(), 500);
    assert_eq!(config.client.request_timeout().map(|d| d.as_millis()), Some(2000));
    assert!(config.client.connect_timeout().is_none());
    assert_eq!(config.telemetry.log_level, "debug");
}

#[test]
fn empty_file_takes_defaults() {
    let config = Config::from_toml("").unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:7878");
}

#[test]
fn sample_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/cabinet.toml");
    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:7878");
}

#[test]
fn validate_bad_bind() {
    let result = Config::from_toml("[server]\nbind = \"not an address\"\n");
    assert!(result.unwrap_err().to_string().contains("server.bind"));
}

#[test]
fn validate_bad_allow_entry() {
    let result = Config::from_toml("[server]\nallow = [\"example.com\"]\n");
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("server.allow"));
}

#[test]
fn validate_exclusive_access_filters() {
    let result = Config::from_toml(
        r#"
[server]
allow = ["10.0.0.1"]
localhost_only = true
"#,
    );
    assert!(result.unwrap_err().to_string().contains("mutually exclusive"));
}

#[test]
fn validate_zero_frame_limit() {
    let result = Config::from_toml("[server]\nmax_frame_bytes = 0\n");
    assert!(result.unwrap_err().to_string().contains("max_frame_bytes"));
}

#[test]
fn validate_zero_drain_timeout() {
    let result = Config::from_toml("[client]\ndrain_timeout_ms = 0\n");
    assert!(result.unwrap_err().to_string().contains("drain_timeout_ms"));
}

#[test]
fn validate_log_level() {
    let result = Config::from_toml("[telemetry]\nlog_level = \"loud\"\n");
    assert!(result.unwrap_err().to_string().contains("log_level"));
}

#[test]
fn missing_file_is_an_error() {
    let result = Config::from_file(Path::new("/nonexistent/cabinet.toml"));
    assert!(result.unwrap_err().to_string().contains("failed to read"));
}

#[test]
fn overrides_replace_file_values() {
    let mut config = Config::default();
    config.apply_overrides(&ConfigOverrides {
        log_level: Some("warn".to_string()),
        bind: Some("127.0.0.1:9999".to_string()),
        storage_path: Some("store.log".to_string()),
        optimize: Some(true),
    });
    assert_eq!(config.telemetry.log_level, "warn");
    assert_eq!(config.server.bind, "127.0.0.1:9999");
    assert_eq!(config.storage.path.as_deref(), Some("store.log"));
    assert!(config.server.optimize);
    config.validate().unwrap();
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn shard_error_names_the_shard() {
    let error = CabinetError::shard(2, CabinetError::Closed);
    assert!(error.to_string().contains('2'));
    assert!(matches!(error, CabinetError::Shard { index: 2, .. }));
}

#[test]
fn connection_fatal_classification() {
    assert!(CabinetError::transport("reset").is_connection_fatal());
    assert!(!CabinetError::remote("no such worker").is_connection_fatal());
}
