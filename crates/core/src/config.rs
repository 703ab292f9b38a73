//! Configuration: `ironstream.toml` parsing and runtime settings.
//!
//! [`IronstreamConfig`] is the root structure holding every section.
//! Each crate reads only its own section and derives its settings from it.
//!
//! # Precedence
//! 1. CLI flags (daemon only)
//! 2. Environment variables (`IRONSTREAM_STREAM_MAX_RETRIES=5`)
//! 3. Config file (`ironstream.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), ironstream_core::error::IronstreamError> {
//! use ironstream_core::config::IronstreamConfig;
//!
//! // file + env overrides + validation
//! let config = IronstreamConfig::load("ironstream.toml").await?;
//!
//! // straight from a TOML string
//! let config = IronstreamConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronstreamError};

/// Protocol kinds a destination can use.
pub const VALID_PROTOCOLS: &[&str] = &["tcp-syslog", "udp-syslog", "file"];

/// Wire formats a destination can render.
pub const VALID_FORMATS: &[&str] = &["cef", "leef", "ecs", "syslog"];

/// Upper bound on `batch_size`.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Upper bound on `flush_interval_ms` (one hour).
pub const MAX_FLUSH_INTERVAL_MS: u64 = 3_600_000;

/// Ironstream root configuration
///
/// Mirrors the top-level layout of `ironstream.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronstreamConfig {
    /// Logging and process settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Prometheus exporter
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// NDJSON TCP ingest listener
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Event normalizer
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    /// Stream manager defaults shared by all destinations
    #[serde(default)]
    pub stream: StreamConfig,
    /// Statically configured destinations
    #[serde(default)]
    pub destinations: Vec<DestinationEntry>,
    /// Correlation engine
    #[serde(default)]
    pub correlation: CorrelationConfig,
}

impl IronstreamConfig {
    /// Loads the TOML file, applies environment overrides, then validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronstreamError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the TOML file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronstreamError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronstreamError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronstreamError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string. Does not validate.
    pub fn parse(toml_str: &str) -> Result<Self, IronstreamError> {
        toml::from_str(toml_str).map_err(|e| {
            IronstreamError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `IRONSTREAM_{SECTION}_{FIELD}` environment overrides.
    ///
    /// Destinations are a list and are not overridable from the environment.
    pub fn apply_env_overrides(&mut self) {
        // general
        override_string(&mut self.general.log_level, "IRONSTREAM_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "IRONSTREAM_GENERAL_LOG_FORMAT",
        );

        // metrics
        override_bool(&mut self.metrics.enabled, "IRONSTREAM_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "IRONSTREAM_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "IRONSTREAM_METRICS_PORT");

        // ingest
        override_bool(&mut self.ingest.enabled, "IRONSTREAM_INGEST_ENABLED");
        override_string(&mut self.ingest.bind, "IRONSTREAM_INGEST_BIND");
        override_usize(
            &mut self.ingest.max_connections,
            "IRONSTREAM_INGEST_MAX_CONNECTIONS",
        );
        override_usize(
            &mut self.ingest.max_line_bytes,
            "IRONSTREAM_INGEST_MAX_LINE_BYTES",
        );

        // normalizer
        override_usize(
            &mut self.normalizer.max_event_bytes,
            "IRONSTREAM_NORMALIZER_MAX_EVENT_BYTES",
        );
        override_bool(
            &mut self.normalizer.threat_intel_enabled,
            "IRONSTREAM_NORMALIZER_THREAT_INTEL_ENABLED",
        );
        override_csv(
            &mut self.normalizer.threat_indicators,
            "IRONSTREAM_NORMALIZER_THREAT_INDICATORS",
        );

        // stream
        override_usize(
            &mut self.stream.max_buffer_events,
            "IRONSTREAM_STREAM_MAX_BUFFER_EVENTS",
        );
        override_usize(
            &mut self.stream.max_buffer_bytes,
            "IRONSTREAM_STREAM_MAX_BUFFER_BYTES",
        );
        override_bool(
            &mut self.stream.flush_on_memory_pressure,
            "IRONSTREAM_STREAM_FLUSH_ON_MEMORY_PRESSURE",
        );
        override_u32(&mut self.stream.max_retries, "IRONSTREAM_STREAM_MAX_RETRIES");
        override_u64(
            &mut self.stream.retry_backoff_base_ms,
            "IRONSTREAM_STREAM_RETRY_BACKOFF_BASE_MS",
        );
        override_u64(
            &mut self.stream.retry_backoff_max_ms,
            "IRONSTREAM_STREAM_RETRY_BACKOFF_MAX_MS",
        );
        override_u64(
            &mut self.stream.delivery_timeout_ms,
            "IRONSTREAM_STREAM_DELIVERY_TIMEOUT_MS",
        );
        override_u32(
            &mut self.stream.circuit_failure_threshold,
            "IRONSTREAM_STREAM_CIRCUIT_FAILURE_THRESHOLD",
        );
        override_u64(
            &mut self.stream.circuit_cooldown_secs,
            "IRONSTREAM_STREAM_CIRCUIT_COOLDOWN_SECS",
        );
        override_usize(
            &mut self.stream.dead_letter_max_entries,
            "IRONSTREAM_STREAM_DEAD_LETTER_MAX_ENTRIES",
        );
        override_u64(
            &mut self.stream.dead_letter_retry_secs,
            "IRONSTREAM_STREAM_DEAD_LETTER_RETRY_SECS",
        );
        override_u32(
            &mut self.stream.dead_letter_max_attempts,
            "IRONSTREAM_STREAM_DEAD_LETTER_MAX_ATTEMPTS",
        );
        override_u64(
            &mut self.stream.shutdown_grace_secs,
            "IRONSTREAM_STREAM_SHUTDOWN_GRACE_SECS",
        );

        // correlation
        override_bool(
            &mut self.correlation.enabled,
            "IRONSTREAM_CORRELATION_ENABLED",
        );
        override_string(
            &mut self.correlation.rule_dir,
            "IRONSTREAM_CORRELATION_RULE_DIR",
        );
        override_usize(
            &mut self.correlation.max_entities_per_rule,
            "IRONSTREAM_CORRELATION_MAX_ENTITIES_PER_RULE",
        );
        override_usize(
            &mut self.correlation.max_window_events,
            "IRONSTREAM_CORRELATION_MAX_WINDOW_EVENTS",
        );
        override_usize(
            &mut self.correlation.max_alert_events,
            "IRONSTREAM_CORRELATION_MAX_ALERT_EVENTS",
        );
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), IronstreamError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_log_formats.join(", ")),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be non-zero when enabled"));
        }

        if self.ingest.enabled {
            if self.ingest.bind.is_empty() {
                return Err(invalid("ingest.bind", "must not be empty when enabled"));
            }
            if self.ingest.max_connections == 0 {
                return Err(invalid("ingest.max_connections", "must be greater than 0"));
            }
            if self.ingest.max_line_bytes == 0 {
                return Err(invalid("ingest.max_line_bytes", "must be greater than 0"));
            }
        }

        if self.normalizer.max_event_bytes == 0 {
            return Err(invalid(
                "normalizer.max_event_bytes",
                "must be greater than 0",
            ));
        }

        self.stream.validate()?;

        let mut seen = HashSet::new();
        for (index, dest) in self.destinations.iter().enumerate() {
            dest.validate(index)?;
            if !seen.insert(dest.id.as_str()) {
                return Err(invalid(
                    &format!("destinations[{index}].id"),
                    format!("duplicate destination id '{}'", dest.id),
                ));
            }
        }

        self.correlation.validate()?;

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> IronstreamError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// Prometheus exporter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the exporter
    pub enabled: bool,
    /// Listen address
    pub listen_addr: String,
    /// Listen port
    pub port: u16,
    /// HTTP path (only `/metrics` is served)
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// NDJSON TCP ingest listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Start the listener
    pub enabled: bool,
    /// Bind address (`host:port`)
    pub bind: String,
    /// Concurrent connection limit
    pub max_connections: usize,
    /// Longest accepted line, in bytes
    pub max_line_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:5140".to_owned(),
            max_connections: 256,
            max_line_bytes: 1024 * 1024,
        }
    }
}

/// Normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Largest accepted raw event, in bytes
    pub max_event_bytes: usize,
    /// Enable the static threat-intel enricher
    pub threat_intel_enabled: bool,
    /// Listed IP addresses for the threat-intel enricher
    pub threat_indicators: Vec<String>,
    /// Name reported in `threat.list`
    pub threat_list_name: String,
    /// JSON field lookup order
    pub fields: FieldMappingConfig,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_event_bytes: 1024 * 1024,
            threat_intel_enabled: false,
            threat_indicators: Vec::new(),
            threat_list_name: "static".to_owned(),
            fields: FieldMappingConfig::default(),
        }
    }
}

/// JSON field lookup order for each canonical field.
///
/// Each entry is a list of dot-separated paths; the first present one wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMappingConfig {
    pub id: Vec<String>,
    pub timestamp: Vec<String>,
    pub source: Vec<String>,
    pub event_type: Vec<String>,
    pub severity: Vec<String>,
    pub message: Vec<String>,
    pub user_id: Vec<String>,
    pub workflow_id: Vec<String>,
    pub execution_id: Vec<String>,
    pub tags: Vec<String>,
}

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

impl Default for FieldMappingConfig {
    fn default() -> Self {
        Self {
            id: paths(&["id", "event_id", "event.id"]),
            timestamp: paths(&["timestamp", "@timestamp", "time"]),
            source: paths(&["source", "source.name"]),
            event_type: paths(&["event_type", "type", "event.action"]),
            severity: paths(&["severity", "level", "event.severity"]),
            message: paths(&["message", "msg"]),
            user_id: paths(&["user_id", "user.id"]),
            workflow_id: paths(&["workflow_id", "workflow.id"]),
            execution_id: paths(&["execution_id", "execution.id"]),
            tags: paths(&["tags"]),
        }
    }
}

/// Stream manager defaults applied to every destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffered events per destination (open + sealed, undelivered)
    pub max_buffer_events: usize,
    /// Buffered bytes per destination
    pub max_buffer_bytes: usize,
    /// Request one synchronous flush before rejecting with backpressure
    pub flush_on_memory_pressure: bool,
    /// Delivery retries after the first attempt
    pub max_retries: u32,
    /// First retry backoff
    pub retry_backoff_base_ms: u64,
    /// Backoff cap
    pub retry_backoff_max_ms: u64,
    /// Timeout around each connector call
    pub delivery_timeout_ms: u64,
    /// Consecutive failures that open the circuit
    pub circuit_failure_threshold: u32,
    /// Open-state duration before a half-open trial
    pub circuit_cooldown_secs: u64,
    /// Dead-letter store capacity, in batches
    pub dead_letter_max_entries: usize,
    /// Background dead-letter retry cadence
    pub dead_letter_retry_secs: u64,
    /// Extra attempts for a dead-lettered batch before it is dropped
    pub dead_letter_max_attempts: u32,
    /// Final-delivery budget on shutdown or delete
    pub shutdown_grace_secs: u64,
    /// Command channel capacity per destination task
    pub destination_channel_capacity: usize,
    /// Capacity of the delivery-failed / dropped notification channel
    pub notification_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_buffer_events: 10_000,
            max_buffer_bytes: 16 * 1024 * 1024,
            flush_on_memory_pressure: true,
            max_retries: 3,
            retry_backoff_base_ms: 200,
            retry_backoff_max_ms: 10_000,
            delivery_timeout_ms: 5_000,
            circuit_failure_threshold: 5,
            circuit_cooldown_secs: 30,
            dead_letter_max_entries: 1_000,
            dead_letter_retry_secs: 60,
            dead_letter_max_attempts: 3,
            shutdown_grace_secs: 10,
            destination_channel_capacity: 1_024,
            notification_channel_capacity: 256,
        }
    }
}

impl StreamConfig {
    /// Validates stream-wide settings.
    pub fn validate(&self) -> Result<(), IronstreamError> {
        let positive: [(&str, u64); 10] = [
            ("stream.max_buffer_events", self.max_buffer_events as u64),
            ("stream.max_buffer_bytes", self.max_buffer_bytes as u64),
            ("stream.retry_backoff_base_ms", self.retry_backoff_base_ms),
            ("stream.delivery_timeout_ms", self.delivery_timeout_ms),
            (
                "stream.circuit_failure_threshold",
                u64::from(self.circuit_failure_threshold),
            ),
            ("stream.circuit_cooldown_secs", self.circuit_cooldown_secs),
            (
                "stream.dead_letter_max_entries",
                self.dead_letter_max_entries as u64,
            ),
            ("stream.dead_letter_retry_secs", self.dead_letter_retry_secs),
            (
                "stream.destination_channel_capacity",
                self.destination_channel_capacity as u64,
            ),
            (
                "stream.notification_channel_capacity",
                self.notification_channel_capacity as u64,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.retry_backoff_max_ms < self.retry_backoff_base_ms {
            return Err(invalid(
                "stream.retry_backoff_max_ms",
                "must be >= retry_backoff_base_ms",
            ));
        }

        Ok(())
    }
}

/// One `[[destinations]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationEntry {
    /// Unique id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// `tcp-syslog`, `udp-syslog` or `file`
    pub protocol: String,
    /// `host:port` or file path
    pub endpoint: String,
    /// Opaque reference resolved by an external secret store
    #[serde(default)]
    pub credential_ref: Option<String>,
    /// `cef`, `leef`, `ecs` or `syslog`
    #[serde(default = "default_format")]
    pub format: String,
    /// Whether fan-out reaches this destination
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Events per sealed batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum age of the oldest buffered event before sealing
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Forwarded to connectors that support compression
    #[serde(default)]
    pub compression: bool,
    /// Uniform sampling rate in `[0, 1]`
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    /// Per-severity sampling rates; unlisted severities use `sampling_rate`
    #[serde(default)]
    pub severity_sampling: BTreeMap<String, f64>,
    /// Higher priority destinations are fanned out to first
    #[serde(default)]
    pub priority: u8,
    /// TCP framing: `newline` or `octet-counting`
    #[serde(default = "default_framing")]
    pub framing: String,
    /// Ordered include/exclude rules
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

fn default_format() -> String {
    "syslog".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_sampling_rate() -> f64 {
    1.0
}

fn default_framing() -> String {
    "newline".to_owned()
}

impl DestinationEntry {
    /// Entry with defaults for everything but identity and transport.
    pub fn new(
        id: impl Into<String>,
        protocol: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            protocol: protocol.into(),
            endpoint: endpoint.into(),
            credential_ref: None,
            format: default_format(),
            enabled: true,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            compression: false,
            sampling_rate: default_sampling_rate(),
            severity_sampling: BTreeMap::new(),
            priority: 0,
            framing: default_framing(),
            filters: Vec::new(),
        }
    }

    /// Validates one destination. `index` only affects error field names.
    pub fn validate(&self, index: usize) -> Result<(), IronstreamError> {
        let field = |name: &str| format!("destinations[{index}].{name}");

        if self.id.trim().is_empty() {
            return Err(invalid(&field("id"), "must not be empty"));
        }
        if !VALID_PROTOCOLS.contains(&self.protocol.as_str()) {
            return Err(invalid(
                &field("protocol"),
                format!("must be one of: {}", VALID_PROTOCOLS.join(", ")),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(invalid(&field("endpoint"), "must not be empty"));
        }
        if !VALID_FORMATS.contains(&self.format.as_str()) {
            return Err(invalid(
                &field("format"),
                format!("must be one of: {}", VALID_FORMATS.join(", ")),
            ));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(
                &field("batch_size"),
                format!("must be 1-{MAX_BATCH_SIZE}"),
            ));
        }
        if self.flush_interval_ms == 0 || self.flush_interval_ms > MAX_FLUSH_INTERVAL_MS {
            return Err(invalid(
                &field("flush_interval_ms"),
                format!("must be 1-{MAX_FLUSH_INTERVAL_MS}"),
            ));
        }
        if !is_rate(self.sampling_rate) {
            return Err(invalid(&field("sampling_rate"), "must be within [0, 1]"));
        }
        for (severity, rate) in &self.severity_sampling {
            if crate::types::Severity::from_str_loose(severity).is_none() {
                return Err(invalid(
                    &field("severity_sampling"),
                    format!("unknown severity '{severity}'"),
                ));
            }
            if !is_rate(*rate) {
                return Err(invalid(
                    &field("severity_sampling"),
                    format!("rate for '{severity}' must be within [0, 1]"),
                ));
            }
        }
        if !["newline", "octet-counting"].contains(&self.framing.as_str()) {
            return Err(invalid(
                &field("framing"),
                "must be one of: newline, octet-counting",
            ));
        }
        for (i, filter) in self.filters.iter().enumerate() {
            filter.validate(&field(&format!("filters[{i}]")))?;
        }
        Ok(())
    }
}

fn is_rate(rate: f64) -> bool {
    (0.0..=1.0).contains(&rate)
}

/// One include/exclude filter rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// `include` or `exclude`
    pub action: String,
    /// Canonical field name or `metadata` key
    pub field: String,
    /// `eq`, `ne`, `range` or `regex`
    pub op: String,
    /// Operand for `eq`, `ne` and `regex`
    #[serde(default)]
    pub value: Option<String>,
    /// Inclusive lower bound for `range`
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound for `range`
    #[serde(default)]
    pub max: Option<f64>,
}

impl FilterConfig {
    fn validate(&self, prefix: &str) -> Result<(), IronstreamError> {
        if !["include", "exclude"].contains(&self.action.as_str()) {
            return Err(invalid(
                &format!("{prefix}.action"),
                "must be one of: include, exclude",
            ));
        }
        if self.field.trim().is_empty() {
            return Err(invalid(&format!("{prefix}.field"), "must not be empty"));
        }
        match self.op.as_str() {
            "eq" | "ne" | "regex" => {
                if self.value.is_none() {
                    return Err(invalid(
                        &format!("{prefix}.value"),
                        format!("required for op '{}'", self.op),
                    ));
                }
            }
            "range" => match (self.min, self.max) {
                (None, None) => {
                    return Err(invalid(
                        &format!("{prefix}.min"),
                        "range needs min or max",
                    ));
                }
                (Some(min), Some(max)) if min > max => {
                    return Err(invalid(&format!("{prefix}.min"), "must be <= max"));
                }
                _ => {}
            },
            other => {
                return Err(invalid(
                    &format!("{prefix}.op"),
                    format!("unknown op '{other}' (eq, ne, range, regex)"),
                ));
            }
        }
        Ok(())
    }
}

/// Correlation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Run the correlation engine
    pub enabled: bool,
    /// Directory of `.yml` / `.yaml` rule files (empty = no file rules)
    pub rule_dir: String,
    /// Rule count limit
    pub max_rules: usize,
    /// Rule file size limit, in bytes
    pub max_rule_file_bytes: u64,
    /// Tracked entities per entity rule
    pub max_entities_per_rule: usize,
    /// Events held in a temporal window; the oldest is evicted first
    pub max_window_events: usize,
    /// Event references kept on an alert
    pub max_alert_events: usize,
    /// Engine input channel capacity
    pub event_channel_capacity: usize,
    /// Alert output channel capacity
    pub alert_channel_capacity: usize,
    /// Attack chains built on top of rule alerts
    pub chains: Vec<ChainConfig>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rule_dir: String::new(),
            max_rules: 1_000,
            max_rule_file_bytes: 1024 * 1024,
            max_entities_per_rule: 10_000,
            max_window_events: 10_000,
            max_alert_events: 20,
            event_channel_capacity: 4_096,
            alert_channel_capacity: 1_024,
            chains: Vec::new(),
        }
    }
}

impl CorrelationConfig {
    /// Validates correlation settings and chain declarations.
    pub fn validate(&self) -> Result<(), IronstreamError> {
        let positive: [(&str, usize); 6] = [
            ("correlation.max_rules", self.max_rules),
            ("correlation.max_entities_per_rule", self.max_entities_per_rule),
            ("correlation.max_window_events", self.max_window_events),
            ("correlation.max_alert_events", self.max_alert_events),
            (
                "correlation.event_channel_capacity",
                self.event_channel_capacity,
            ),
            (
                "correlation.alert_channel_capacity",
                self.alert_channel_capacity,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }
        if self.max_rule_file_bytes == 0 {
            return Err(invalid(
                "correlation.max_rule_file_bytes",
                "must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for (index, chain) in self.chains.iter().enumerate() {
            let field = |name: &str| format!("correlation.chains[{index}].{name}");
            if chain.id.trim().is_empty() {
                return Err(invalid(&field("id"), "must not be empty"));
            }
            if !seen.insert(chain.id.as_str()) {
                return Err(invalid(
                    &field("id"),
                    format!("duplicate chain id '{}'", chain.id),
                ));
            }
            if chain.stages.len() < 2 {
                return Err(invalid(&field("stages"), "needs at least 2 stages"));
            }
            for (i, stage) in chain.stages.iter().enumerate() {
                if stage.rule_id.trim().is_empty() {
                    return Err(invalid(
                        &field(&format!("stages[{i}].rule_id")),
                        "must not be empty",
                    ));
                }
                if i > 0 && stage.max_gap_secs == 0 {
                    return Err(invalid(
                        &field(&format!("stages[{i}].max_gap_secs")),
                        "must be greater than 0",
                    ));
                }
            }
            if let Some(sev) = &chain.severity {
                if crate::types::Severity::from_str_loose(sev).is_none() {
                    return Err(invalid(
                        &field("severity"),
                        format!("unknown severity '{sev}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Ordered rule list whose alerts form an attack chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain id, used as the composite alert's rule id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Composite severity; defaults to one level above the highest stage
    #[serde(default)]
    pub severity: Option<String>,
    /// MITRE technique for the composite alert
    #[serde(default)]
    pub mitre_technique: Option<String>,
    /// Stages in the order they must fire
    pub stages: Vec<ChainStageConfig>,
}

/// One attack-chain stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStageConfig {
    /// Rule whose alert completes this stage
    pub rule_id: String,
    /// Time budget since the previous stage (ignored for the first stage)
    #[serde(default)]
    pub max_gap_secs: u64,
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, kind: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                kind,
                "failed to parse env var override, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
