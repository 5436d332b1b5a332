//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use polyrpc::config::{Backpressure, EngineConfig, LoggingConfig, ServerConfig};
use polyrpc::transport::ModuleOptions;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = EngineConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_zero_max_in_flight() {
    let mut config = EngineConfig::default();
    config.server.max_in_flight = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("max_in_flight must be greater than 0")));
}

#[test]
fn test_excessive_max_in_flight() {
    let mut config = EngineConfig::default();
    config.server.max_in_flight = 2_000_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("max_in_flight too large")));
}

#[test]
fn test_zero_queue_capacity() {
    let mut config = EngineConfig::default();
    config.server.queue_capacity = 0;

    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("queue_capacity")));
}

#[test]
fn test_shutdown_timeout_bounds() {
    let mut config = EngineConfig::default();
    config.server.shutdown_timeout = Duration::from_millis(1);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Shutdown timeout too short")));

    config.server.shutdown_timeout = Duration::from_secs(600);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Shutdown timeout too long")));
}

#[test]
fn test_zero_timeouts_disable_rather_than_fail() {
    let mut config = EngineConfig::default();
    config.server.read_timeout = Duration::ZERO;
    config.server.write_timeout = Duration::ZERO;
    assert!(config.validate().is_empty());

    let opts = ModuleOptions::from(&config.server);
    assert_eq!(opts.read_timeout, None);
    assert_eq!(opts.write_timeout, None);
}

#[test]
fn test_tiny_frame_limit() {
    let mut config = EngineConfig::default();
    config.server.max_frame_size = 8;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("max_frame_size too small")));
}

#[test]
fn test_logging_requires_output() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_log_file_path_required() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_validate_strict_collects_all_errors() {
    let mut config = EngineConfig::default();
    config.server.max_in_flight = 0;
    config.server.queue_capacity = 0;

    let err = config.validate_strict().expect_err("invalid config");
    let msg = err.to_string();
    assert!(msg.contains("max_in_flight"));
    assert!(msg.contains("queue_capacity"));
}

#[test]
fn test_toml_round_trip_through_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("polyrpc.toml");

    let config = EngineConfig::default_with_overrides(|c| {
        c.server.backpressure = Backpressure::Reject;
        c.server.max_in_flight = 64;
        c.server.read_timeout = Duration::from_secs(30);
        c.logging.log_level = Level::DEBUG;
    });
    config.save_to_file(&path).expect("save");

    let loaded = EngineConfig::from_file(&path).expect("load");
    assert_eq!(loaded.server.backpressure, Backpressure::Reject);
    assert_eq!(loaded.server.max_in_flight, 64);
    assert_eq!(loaded.server.read_timeout, Duration::from_secs(30));
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = EngineConfig::from_toml(
        r#"
        [server]
        max_in_flight = 10
        backpressure = "reject"
        shutdown_timeout = 2500
        "#,
    )
    .expect("parse");

    assert_eq!(config.server.max_in_flight, 10);
    assert_eq!(config.server.backpressure, Backpressure::Reject);
    assert_eq!(config.server.shutdown_timeout, Duration::from_millis(2500));
    assert_eq!(
        config.server.queue_capacity,
        ServerConfig::default().queue_capacity
    );
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = EngineConfig::from_toml("[server]\nbackpressure = \"maybe\"\n").expect_err("bad");
    assert!(err.is_fatal());
}

#[test]
fn test_example_config_parses() {
    let example = EngineConfig::example_config();
    assert!(example.contains("max_in_flight"));
    assert!(EngineConfig::from_toml(&example).is_ok());
}

#[test]
fn test_env_overrides() {
    std::env::set_var("POLYRPC_MAX_IN_FLIGHT", "77");
    std::env::set_var("POLYRPC_BACKPRESSURE", "Reject");
    std::env::set_var("POLYRPC_READ_TIMEOUT_MS", "not-a-number");

    let config = EngineConfig::from_env().expect("env config");
    assert_eq!(config.server.max_in_flight, 77);
    assert_eq!(config.server.backpressure, Backpressure::Reject);
    assert_eq!(config.server.read_timeout, ServerConfig::default().read_timeout);

    std::env::remove_var("POLYRPC_MAX_IN_FLIGHT");
    std::env::remove_var("POLYRPC_BACKPRESSURE");
    std::env::remove_var("POLYRPC_READ_TIMEOUT_MS");
}
