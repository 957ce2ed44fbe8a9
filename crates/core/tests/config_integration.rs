//! Configuration integration tests
//!
//! - parsing the shipped logferry.toml.example
//! - partial files merged with defaults
//! - environment override precedence
//! - loading from disk

use std::io::Write;

use logferry_core::config::LogferryConfig;
use logferry_core::error::{ConfigError, LogferryError};

const EXAMPLE: &str = include_str!("../../../logferry.toml.example");

// =============================================================================
// logferry.toml.example
// =============================================================================

#[test]
fn example_config_parses_and_validates() {
    let config = LogferryConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert!(!config.admin.enabled);
    assert!(!config.metrics.enabled);
}

#[test]
fn example_config_lists_every_builtin_kind() {
    let config = LogferryConfig::parse(EXAMPLE).expect("should parse");

    let inputs: Vec<&str> = config.inputs.iter().map(|d| d.kind.as_str()).collect();
    assert_eq!(inputs, vec!["udp", "tcp"]);

    let outputs: Vec<&str> = config.outputs.iter().map(|d| d.kind.as_str()).collect();
    assert_eq!(outputs, vec!["stdout", "file", "webhook"]);
}

#[test]
fn example_config_matches_code_defaults() {
    let example = LogferryConfig::parse(EXAMPLE).expect("should parse");
    let defaults = LogferryConfig::default();

    assert_eq!(example.general.log_level, defaults.general.log_level);
    assert_eq!(
        example.general.shutdown_timeout_secs,
        defaults.general.shutdown_timeout_secs
    );
    assert_eq!(
        example.general.channel_capacity,
        defaults.general.channel_capacity
    );
    assert_eq!(example.admin.port, defaults.admin.port);
    assert_eq!(example.metrics.port, defaults.metrics.port);
    assert_eq!(example.metrics.endpoint, defaults.metrics.endpoint);
}

#[test]
fn example_webhook_attributes_are_collected() {
    let config = LogferryConfig::parse(EXAMPLE).expect("should parse");
    let webhook = config
        .outputs
        .iter()
        .find(|d| d.kind == "webhook")
        .expect("webhook output present");

    let attrs = webhook.params.prefixed("attribute.");
    assert_eq!(attrs.get("env").map(String::as_str), Some("prod"));
    assert_eq!(webhook.params.get_str("pool_name"), Some("ingest"));
}

// =============================================================================
// Partial configuration
// =============================================================================

#[test]
fn empty_file_uses_defaults() {
    let config = LogferryConfig::parse("").expect("empty config should parse");
    assert_eq!(config.general.log_level, "info");
    assert!(config.inputs.is_empty());
    assert!(config.outputs.is_empty());
}

#[test]
fn partial_admin_section_merges_with_defaults() {
    let config = LogferryConfig::parse(
        r#"
[admin]
enabled = true
"#,
    )
    .expect("should parse");
    assert!(config.admin.enabled);
    assert_eq!(config.admin.port, 8081);
    assert_eq!(config.admin.listen_addr, "127.0.0.1");
}

#[test]
fn output_without_type_is_a_parse_error() {
    let err = LogferryConfig::parse(
        r#"
[[outputs]]
path = "/tmp/x.log"
"#,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LogferryError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn wrong_type_for_typed_field_is_a_parse_error() {
    let err = LogferryConfig::parse(
        r#"
[admin]
port = "eighty"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("parse"));
}

// =============================================================================
// Environment overrides
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let mut config = LogferryConfig::parse(
        r#"
[general]
log_level = "warn"
"#,
    )
    .expect("should parse");

    // SAFETY: env mutation is serialized across these tests.
    unsafe { std::env::set_var("LOGFERRY_GENERAL_LOG_LEVEL", "debug") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("LOGFERRY_GENERAL_LOG_LEVEL") };

    assert_eq!(config.general.log_level, "debug");
}

#[test]
#[serial_test::serial]
fn invalid_env_override_is_caught_by_validation() {
    let mut config = LogferryConfig::default();

    // SAFETY: env mutation is serialized across these tests.
    unsafe { std::env::set_var("LOGFERRY_GENERAL_LOG_FORMAT", "xml") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("LOGFERRY_GENERAL_LOG_FORMAT") };

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("log_format"));
}

// =============================================================================
// Loading from disk
// =============================================================================

#[tokio::test]
#[serial_test::serial]
async fn load_reads_file_and_validates() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"
[general]
log_format = "pretty"

[[outputs]]
type = "stdout"
"#
    )
    .expect("write");

    let config = LogferryConfig::load(file.path()).await.expect("should load");
    assert_eq!(config.general.log_format, "pretty");
    assert_eq!(config.outputs.len(), 1);
}

#[tokio::test]
async fn load_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(
        file,
        r#"
[general]
log_level = "loud"
"#
    )
    .expect("write");

    let err = LogferryConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        LogferryError::Config(ConfigError::InvalidValue { .. })
    ));
}
