//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rnp_protocol::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig, DEFAULT_PORT,
};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_defaults_match_protocol_constants() {
    let config = NetworkConfig::default();
    assert_eq!(config.server.address, format!("0.0.0.0:{DEFAULT_PORT}"));
    assert_eq!(config.server.tick_rate_hz, 60);
    assert_eq!(config.server.mtu_payload_bytes, 512);
    assert_eq!(config.transport.max_payload_size, 512);
    assert_eq!(config.transport.retransmit_interval, Duration::from_millis(200));
    assert_eq!(config.client.host_port().unwrap(), ("127.0.0.1".to_string(), 4567));
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_tick_rate() {
    let config = NetworkConfig::default_with_overrides(|c| c.server.tick_rate_hz = 0);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Tick rate must be greater than 0")));
}

#[test]
fn test_mtu_above_wire_limit() {
    let config = NetworkConfig::default_with_overrides(|c| c.server.mtu_payload_bytes = 1400);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("MTU payload bytes too large")));
}

#[test]
fn test_mtu_above_transport_limit() {
    let config = NetworkConfig::default_with_overrides(|c| c.transport.max_payload_size = 256);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("exceeds transport max payload")));
}

#[test]
fn test_zero_max_clients() {
    let server = ServerConfig {
        max_clients: 0,
        ..ServerConfig::default()
    };
    assert!(server
        .validate()
        .iter()
        .any(|e| e.contains("Max clients must be greater than 0")));
}

#[test]
fn test_client_address_forms() {
    let hostname = ClientConfig {
        address: "game.example.com:4567".into(),
        ..ClientConfig::default()
    };
    assert!(hostname.validate().is_empty());
    assert_eq!(hostname.host_port().unwrap().0, "game.example.com");

    let ipv6 = ClientConfig {
        address: "[::1]:4567".into(),
        ..ClientConfig::default()
    };
    assert_eq!(ipv6.host_port().unwrap(), ("::1".to_string(), 4567));

    let missing_port = ClientConfig {
        address: "localhost".into(),
        ..ClientConfig::default()
    };
    assert!(missing_port
        .validate()
        .iter()
        .any(|e| e.contains("Invalid client address")));
}

#[test]
fn test_empty_player_name() {
    let client = ClientConfig {
        player_name: String::new(),
        ..ClientConfig::default()
    };
    assert!(client
        .validate()
        .iter()
        .any(|e| e.contains("Player name cannot be empty")));
}

#[test]
fn test_transport_limits() {
    let transport = TransportConfig {
        max_payload_size: 4096,
        ..TransportConfig::default()
    };
    assert!(transport
        .validate()
        .iter()
        .any(|e| e.contains("Max payload size too large")));

    let transport = TransportConfig {
        recv_buffer_size: 100,
        ..TransportConfig::default()
    };
    assert!(transport
        .validate()
        .iter()
        .any(|e| e.contains("Receive buffer too small")));

    let transport = TransportConfig {
        event_queue_capacity: 0,
        ..TransportConfig::default()
    };
    assert!(!transport.validate().is_empty());
}

#[test]
fn test_retransmit_interval_bounds() {
    let disabled = TransportConfig {
        retransmit_interval: Duration::ZERO,
        ..TransportConfig::default()
    };
    assert!(disabled.validate().is_empty());

    let too_short = TransportConfig {
        retransmit_interval: Duration::from_millis(2),
        ..TransportConfig::default()
    };
    assert!(too_short
        .validate()
        .iter()
        .any(|e| e.contains("Retransmit interval too short")));
}

#[test]
fn test_long_app_name() {
    let logging = LoggingConfig {
        app_name: "x".repeat(65),
        ..LoggingConfig::default()
    };
    assert!(logging.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_validate_strict_joins_errors() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "nope".into();
        c.server.max_clients = 0;
    });
    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Invalid server address"));
    assert!(err.contains("Max clients"));
}

#[test]
fn test_toml_partial_sections_use_defaults() {
    let config = NetworkConfig::from_toml(
        r#"
        [server]
        address = "127.0.0.1:5000"
        tick_rate_hz = 30

        [transport]
        retransmit_interval = 50

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("partial TOML should parse");

    assert_eq!(config.server.address, "127.0.0.1:5000");
    assert_eq!(config.server.tick_rate_hz, 30);
    assert_eq!(config.server.max_clients, 64);
    assert_eq!(config.transport.retransmit_interval, Duration::from_millis(50));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert_eq!(config.client.player_name, "player");
}

#[test]
fn test_invalid_log_level_rejected() {
    let result = NetworkConfig::from_toml(
        r#"
        [logging]
        log_level = "loud"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_example_config_round_trips() {
    let text = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&text).expect("example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.server.address, ServerConfig::default().address);
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("rnp-config-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| c.client.player_name = "Ace".into());
    config.save_to_file(&path).unwrap();

    let loaded = NetworkConfig::from_file(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.client.player_name, "Ace");
}

#[test]
fn test_missing_file_is_config_error() {
    let err = NetworkConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

#[test]
fn test_env_overrides() {
    std::env::set_var("RNP_TICK_RATE_HZ", "20");
    std::env::set_var("RNP_RETRANSMIT_INTERVAL_MS", "0");
    std::env::set_var("RNP_PLAYER_NAME", "Envy");
    let config = NetworkConfig::from_env().unwrap();
    assert_eq!(config.server.tick_rate_hz, 20);
    assert!(config.transport.retransmit_interval.is_zero());
    assert_eq!(config.client.player_name, "Envy");

    std::env::set_var("RNP_TICK_RATE_HZ", "fast");
    assert!(NetworkConfig::from_env().is_err());

    for var in ["RNP_TICK_RATE_HZ", "RNP_RETRANSMIT_INTERVAL_MS", "RNP_PLAYER_NAME"] {
        std::env::remove_var(var);
    }
}
