//! Stream manager settings
//!
//! [`StreamSettings`] is derived from core's
//! [`StreamConfig`](ironstream_core::config::StreamConfig) and [`DestinationSettings`]
//! from one `[[destinations]]` entry. Both resolve raw numbers and strings into
//! durations, enums, compiled filters and sampling policies, so destination tasks
//! never parse anything at runtime.
//!
//! ```ignore
//! use ironstream_core::config::IronstreamConfig;
//! use ironstream_stream::config::{DestinationSettings, StreamSettings};
//!
//! let core = IronstreamConfig::default();
//! let stream = StreamSettings::from_core(&core.stream);
//! let destinations = core
//!     .destinations
//!     .iter()
//!     .map(DestinationSettings::from_entry)
//!     .collect::<Result<Vec<_>, _>>()?;
//! ```

use std::fmt;
use std::time::Duration;

use ironstream_core::config::{DestinationEntry, StreamConfig};
use ironstream_normalizer::FormatKind;

use crate::error::StreamError;
use crate::filter::FilterChain;
use crate::sampling::SamplingPolicy;

/// Stream-wide settings shared by every destination task
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub max_buffer_events: usize,
    pub max_buffer_bytes: usize,
    pub flush_on_memory_pressure: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    pub retry_backoff_max: Duration,
    pub delivery_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub dead_letter_max_entries: usize,
    pub dead_letter_retry_interval: Duration,
    pub dead_letter_max_attempts: u32,
    pub shutdown_grace: Duration,
    pub destination_channel_capacity: usize,
    pub notification_channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from_core(&StreamConfig::default())
    }
}

impl StreamSettings {
    pub fn from_core(core: &StreamConfig) -> Self {
        Self {
            max_buffer_events: core.max_buffer_events.max(1),
            max_buffer_bytes: core.max_buffer_bytes.max(1),
            flush_on_memory_pressure: core.flush_on_memory_pressure,
            max_retries: core.max_retries,
            retry_backoff_base: Duration::from_millis(core.retry_backoff_base_ms.max(1)),
            retry_backoff_max: Duration::from_millis(
                core.retry_backoff_max_ms.max(core.retry_backoff_base_ms.max(1)),
            ),
            delivery_timeout: Duration::from_millis(core.delivery_timeout_ms.max(1)),
            circuit_failure_threshold: core.circuit_failure_threshold.max(1),
            circuit_cooldown: Duration::from_secs(core.circuit_cooldown_secs.max(1)),
            dead_letter_max_entries: core.dead_letter_max_entries.max(1),
            dead_letter_retry_interval: Duration::from_secs(core.dead_letter_retry_secs.max(1)),
            dead_letter_max_attempts: core.dead_letter_max_attempts,
            shutdown_grace: Duration::from_secs(core.shutdown_grace_secs),
            destination_channel_capacity: core.destination_channel_capacity.max(1),
            notification_channel_capacity: core.notification_channel_capacity.max(1),
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.retry_backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.retry_backoff_max)
    }
}

/// Transport used by a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    TcpSyslog,
    UdpSyslog,
    File,
}

impl ProtocolKind {
    pub fn parse(destination: &str, s: &str) -> Result<Self, StreamError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp-syslog" | "tcp" => Ok(Self::TcpSyslog),
            "udp-syslog" | "udp" => Ok(Self::UdpSyslog),
            "file" => Ok(Self::File),
            other => Err(StreamError::invalid(
                destination,
                format!("unknown protocol '{other}'"),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TcpSyslog => "tcp-syslog",
            Self::UdpSyslog => "udp-syslog",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TCP record framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// `record\n`
    #[default]
    Newline,
    /// RFC 6587 `len SP record`
    OctetCounting,
}

impl Framing {
    pub fn parse(destination: &str, s: &str) -> Result<Self, StreamError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newline" | "lf" => Ok(Self::Newline),
            "octet-counting" | "octet_counting" => Ok(Self::OctetCounting),
            other => Err(StreamError::invalid(
                destination,
                format!("unknown framing '{other}'"),
            )),
        }
    }
}

/// Resolved settings for one destination
#[derive(Debug, Clone)]
pub struct DestinationSettings {
    pub id: String,
    pub name: String,
    pub protocol: ProtocolKind,
    pub endpoint: String,
    /// Passed through untouched; secrets are resolved outside this crate.
    pub credential_ref: Option<String>,
    pub format: FormatKind,
    pub enabled: bool,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub compression: bool,
    pub sampling: SamplingPolicy,
    pub priority: u8,
    pub framing: Framing,
    pub filters: FilterChain,
}

impl DestinationSettings {
    /// Starts a builder with defaults for everything but identity and transport.
    pub fn builder(
        id: impl Into<String>,
        protocol: ProtocolKind,
        endpoint: impl Into<String>,
    ) -> DestinationSettingsBuilder {
        DestinationSettingsBuilder::new(id.into(), protocol, endpoint.into())
    }

    /// Resolves a config entry, compiling filters and sampling tables.
    pub fn from_entry(entry: &DestinationEntry) -> Result<Self, StreamError> {
        let id = entry.id.trim();
        if id.is_empty() {
            return Err(StreamError::invalid("", "id must not be empty"));
        }
        if entry.endpoint.trim().is_empty() {
            return Err(StreamError::invalid(id, "endpoint must not be empty"));
        }
        if entry.batch_size == 0 {
            return Err(StreamError::invalid(id, "batch_size must be at least 1"));
        }
        if entry.flush_interval_ms == 0 {
            return Err(StreamError::invalid(
                id,
                "flush_interval_ms must be at least 1",
            ));
        }
        let format = entry
            .format
            .parse::<FormatKind>()
            .map_err(|e| StreamError::invalid(id, e.to_string()))?;

        Ok(Self {
            id: id.to_owned(),
            name: if entry.name.is_empty() {
                id.to_owned()
            } else {
                entry.name.clone()
            },
            protocol: ProtocolKind::parse(id, &entry.protocol)?,
            endpoint: entry.endpoint.clone(),
            credential_ref: entry.credential_ref.clone(),
            format,
            enabled: entry.enabled,
            batch_size: entry.batch_size,
            flush_interval: Duration::from_millis(entry.flush_interval_ms),
            compression: entry.compression,
            sampling: SamplingPolicy::from_config(
                id,
                entry.sampling_rate,
                &entry.severity_sampling,
            )?,
            priority: entry.priority,
            framing: Framing::parse(id, &entry.framing)?,
            filters: FilterChain::from_config(id, &entry.filters)?,
        })
    }
}

/// Builder for [`DestinationSettings`]
#[derive(Debug)]
pub struct DestinationSettingsBuilder {
    settings: DestinationSettings,
}

impl DestinationSettingsBuilder {
    fn new(id: String, protocol: ProtocolKind, endpoint: String) -> Self {
        Self {
            settings: DestinationSettings {
                name: id.clone(),
                id,
                protocol,
                endpoint,
                credential_ref: None,
                format: FormatKind::Syslog,
                enabled: true,
                batch_size: 100,
                flush_interval: Duration::from_secs(1),
                compression: false,
                sampling: SamplingPolicy::default(),
                priority: 0,
                framing: Framing::Newline,
                filters: FilterChain::default(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    pub fn format(mut self, format: FormatKind) -> Self {
        self.settings.format = format;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.settings.enabled = enabled;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.settings.batch_size = batch_size.max(1);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.settings.flush_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn compression(mut self, compression: bool) -> Self {
        self.settings.compression = compression;
        self
    }

    pub fn sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.settings.sampling = sampling;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.settings.priority = priority;
        self
    }

    pub fn framing(mut self, framing: Framing) -> Self {
        self.settings.framing = framing;
        self
    }

    pub fn filters(mut self, filters: FilterChain) -> Self {
        self.settings.filters = filters;
        self
    }

    pub fn credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.settings.credential_ref = Some(credential_ref.into());
        self
    }

    pub fn build(self) -> DestinationSettings {
        self.settings
    }
}
