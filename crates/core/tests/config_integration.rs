//! `ironstream.toml` integration tests
//!
//! - parsing the shipped example file
//! - partial files merging with defaults
//! - environment overrides on top of a file
//! - file-level errors

use std::io::Write;

use ironstream_core::config::IronstreamConfig;
use ironstream_core::error::{ConfigError, IronstreamError};
use serial_test::serial;

const EXAMPLE: &str = include_str!("../../../ironstream.toml.example");

#[test]
fn example_config_parses_and_validates() {
    let config = IronstreamConfig::parse(EXAMPLE).expect("example config should parse");
    config
        .validate()
        .expect("example config should pass validation");

    assert_eq!(config.general.log_level, "info");
    assert!(config.ingest.enabled);
    assert!(config.normalizer.threat_intel_enabled);
    assert_eq!(config.normalizer.threat_indicators.len(), 2);
}

#[test]
fn example_config_destinations() {
    let config = IronstreamConfig::parse(EXAMPLE).expect("should parse");
    assert_eq!(config.destinations.len(), 2);

    let siem = &config.destinations[0];
    assert_eq!(siem.id, "siem-primary");
    assert_eq!(siem.protocol, "tcp-syslog");
    assert_eq!(siem.format, "cef");
    assert_eq!(siem.framing, "octet-counting");
    assert_eq!(siem.credential_ref.as_deref(), Some("vault://siem/primary"));
    assert_eq!(siem.filters.len(), 1);
    assert_eq!(siem.filters[0].action, "exclude");

    let archive = &config.destinations[1];
    assert_eq!(archive.protocol, "file");
    assert!((archive.sampling_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(archive.severity_sampling.get("critical"), Some(&1.0));
    assert!(archive.enabled);
}

#[test]
fn example_config_chains() {
    let config = IronstreamConfig::parse(EXAMPLE).expect("should parse");
    let chain = &config.correlation.chains[0];
    assert_eq!(chain.stages.len(), 2);
    assert_eq!(chain.stages[0].max_gap_secs, 0);
    assert_eq!(chain.stages[1].max_gap_secs, 1800);
}

#[test]
fn partial_config_merges_with_defaults() {
    let config = IronstreamConfig::parse(
        r#"
[stream]
max_retries = 7
"#,
    )
    .expect("should parse");
    assert_eq!(config.stream.max_retries, 7);
    assert_eq!(config.stream.circuit_failure_threshold, 5);
    assert_eq!(config.general.log_format, "json");
    config.validate().expect("should validate");
}

#[test]
fn unknown_destination_format_fails_validation() {
    let config = IronstreamConfig::parse(
        r#"
[[destinations]]
id = "x"
protocol = "file"
endpoint = "/tmp/x"
format = "protobuf"
"#,
    )
    .expect("should parse");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("destinations[0].format"));
}

#[tokio::test]
async fn from_file_reads_and_validates() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[general]\nlog_level = \"debug\"").unwrap();
    let config = IronstreamConfig::from_file(file.path()).await.unwrap();
    assert_eq!(config.general.log_level, "debug");
}

#[tokio::test]
async fn from_file_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[stream]\nmax_buffer_events = 0").unwrap();
    let err = IronstreamConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        IronstreamError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[tokio::test]
#[serial]
async fn load_applies_env_overrides_after_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[general]\nlog_level = \"debug\"").unwrap();

    // SAFETY: serialised with the other env-mutating tests.
    unsafe { std::env::set_var("IRONSTREAM_GENERAL_LOG_LEVEL", "warn") };
    let result = IronstreamConfig::load(file.path()).await;
    unsafe { std::env::remove_var("IRONSTREAM_GENERAL_LOG_LEVEL") };

    assert_eq!(result.unwrap().general.log_level, "warn");
}

#[tokio::test]
#[serial]
async fn load_rejects_invalid_env_override() {
    let file = tempfile::NamedTempFile::new().unwrap();

    // SAFETY: serialised with the other env-mutating tests.
    unsafe { std::env::set_var("IRONSTREAM_GENERAL_LOG_FORMAT", "xml") };
    let result = IronstreamConfig::load(file.path()).await;
    unsafe { std::env::remove_var("IRONSTREAM_GENERAL_LOG_FORMAT") };

    assert!(result.is_err());
}
