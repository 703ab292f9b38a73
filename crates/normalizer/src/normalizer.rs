//! Raw bytes → canonical event.
//!
//! Routing is by the first significant byte:
//!
//! | prefix | handled by |
//! |---|---|
//! | `{` with an `ecs` object | [`EcsFormat`] |
//! | `{` | [`JsonMapper`] |
//! | `CEF:` | [`CefFormat`] |
//! | `LEEF:` | [`LeefFormat`] |
//! | `<` | [`SyslogFormat`] |
//!
//! Anything else is rejected with [`FormatError::UnsupportedFormat`].

use std::sync::Arc;

use bytes::Bytes;
use ironstream_core::config::NormalizerConfig;
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;
use ironstream_core::metrics as m;
use serde_json::Value;
use tracing::debug;

use crate::enrich::{Enricher, ThreatIntelEnricher};
use crate::format::{CefFormat, EcsFormat, FormatKind, LeefFormat, SyslogFormat, WireFormat};
use crate::json::{FieldMapping, JsonMapper};

/// Default raw size limit (1 MiB).
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

const FORMAT_JSON: &str = "json";

/// Turns raw submissions into canonical events
///
/// Stateless apart from configuration; share one instance behind an `Arc`.
///
/// # Example
/// ```ignore
/// let normalizer = Normalizer::builder().max_event_bytes(64 * 1024).build();
/// let event = normalizer.normalize(br#"{"timestamp":"2026-01-15T12:00:00Z","source":"api","message":"hi"}"#)?;
/// ```
#[derive(Clone)]
pub struct Normalizer {
    mapper: JsonMapper,
    max_event_bytes: usize,
    enricher: Option<Arc<dyn Enricher>>,
}

impl Normalizer {
    pub fn builder() -> NormalizerBuilder {
        NormalizerBuilder::default()
    }

    /// Builds a normalizer from the `[normalizer]` section.
    ///
    /// The threat-intel enricher is attached only when enabled and given indicators.
    pub fn from_core(config: &NormalizerConfig) -> Self {
        let mut builder = Self::builder()
            .max_event_bytes(config.max_event_bytes)
            .mapping(FieldMapping::from_core(&config.fields));
        if config.threat_intel_enabled {
            let enricher =
                ThreatIntelEnricher::new(&config.threat_indicators, config.threat_list_name.clone());
            if enricher.is_empty() {
                tracing::warn!("threat intel enabled without usable indicators, skipping enricher");
            } else {
                builder = builder.enricher(Arc::new(enricher));
            }
        }
        builder.build()
    }

    pub fn max_event_bytes(&self) -> usize {
        self.max_event_bytes
    }

    /// Normalizes one raw submission (a JSON object or a single text line).
    pub fn normalize(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let result = self.normalize_inner(raw);
        match &result {
            Ok((format, _)) => {
                metrics::counter!(m::NORMALIZER_EVENTS_TOTAL, m::LABEL_FORMAT => *format)
                    .increment(1);
            }
            Err(e) => {
                debug!(error = %e, size = raw.len(), "rejected raw event");
                metrics::counter!(m::NORMALIZER_REJECTED_TOTAL, m::LABEL_REASON => e.reason_code())
                    .increment(1);
            }
        }
        result.map(|(_, event)| self.enrich(event))
    }

    /// Normalizes an already-parsed JSON value (ECS documents included).
    pub fn normalize_value(&self, value: &Value) -> Result<CanonicalEvent, FormatError> {
        let (format, result) = self.map_json(value);
        match result {
            Ok(event) => {
                metrics::counter!(m::NORMALIZER_EVENTS_TOTAL, m::LABEL_FORMAT => format)
                    .increment(1);
                Ok(self.enrich(event))
            }
            Err(e) => {
                metrics::counter!(m::NORMALIZER_REJECTED_TOTAL, m::LABEL_REASON => e.reason_code())
                    .increment(1);
                Err(e)
            }
        }
    }

    /// Renders `event` in the given wire format.
    pub fn render(&self, event: &CanonicalEvent, kind: FormatKind) -> Bytes {
        kind.wire_format().render(event)
    }

    fn normalize_inner(&self, raw: &[u8]) -> Result<(&'static str, CanonicalEvent), FormatError> {
        if raw.len() > self.max_event_bytes {
            return Err(FormatError::TooLarge {
                size: raw.len(),
                max: self.max_event_bytes,
            });
        }

        // trailing spaces can belong to a message at the end of the line
        let trimmed = strip_line_end(raw.trim_ascii_start());
        if trimmed.trim_ascii_end().is_empty() {
            return Err(FormatError::malformed("raw", 0, "empty payload"));
        }

        if trimmed.starts_with(b"{") {
            let value: Value = serde_json::from_slice(trimmed)
                .map_err(|e| FormatError::malformed(FORMAT_JSON, e.column(), e.to_string()))?;
            let (format, result) = self.map_json(&value);
            return result.map(|event| (format, event));
        }

        let format: &dyn WireFormat = if trimmed.starts_with(b"CEF:") {
            &CefFormat
        } else if trimmed.starts_with(b"LEEF:") {
            &LeefFormat
        } else if trimmed.starts_with(b"<") {
            &SyslogFormat
        } else {
            let head = String::from_utf8_lossy(&trimmed[..trimmed.len().min(16)]).into_owned();
            return Err(FormatError::UnsupportedFormat(format!(
                "unrecognized payload starting with '{head}'"
            )));
        };
        format.parse(trimmed).map(|event| (format.format_name(), event))
    }

    fn map_json(&self, value: &Value) -> (&'static str, Result<CanonicalEvent, FormatError>) {
        if EcsFormat::is_ecs(value) {
            (FormatKind::Ecs.as_str(), EcsFormat::from_value(value))
        } else {
            (FORMAT_JSON, self.mapper.map_value(value))
        }
    }

    fn enrich(&self, event: CanonicalEvent) -> CanonicalEvent {
        let Some(enricher) = &self.enricher else {
            return event;
        };
        match enricher.enrich(&event) {
            Ok(extra) if extra.is_empty() => event,
            Ok(extra) => event.with_extra_metadata(extra),
            Err(e) => {
                debug!(enricher = enricher.name(), event_id = event.id(), error = %e, "enrichment failed");
                metrics::counter!(m::NORMALIZER_ENRICHMENT_FAILURES_TOTAL).increment(1);
                event
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("mapping", self.mapper.mapping())
            .field("max_event_bytes", &self.max_event_bytes)
            .field("enricher", &self.enricher.as_ref().map(|e| e.name().to_owned()))
            .finish()
    }
}

/// Drops the line terminator (`\n` or `\r\n`, repeated) and nothing else.
fn strip_line_end(mut raw: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b'\n'] = raw {
        raw = rest;
    }
    raw
}

/// Builder for [`Normalizer`]
#[derive(Default)]
pub struct NormalizerBuilder {
    mapping: Option<FieldMapping>,
    max_event_bytes: Option<usize>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl NormalizerBuilder {
    pub fn mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn max_event_bytes(mut self, max: usize) -> Self {
        self.max_event_bytes = Some(max);
        self
    }

    pub fn enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn build(self) -> Normalizer {
        Normalizer {
            mapper: JsonMapper::new(self.mapping.unwrap_or_default()),
            max_event_bytes: self.max_event_bytes.unwrap_or(DEFAULT_MAX_EVENT_BYTES),
            enricher: self.enricher,
        }
    }
}
