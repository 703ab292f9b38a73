//! JSON object → canonical event.
//!
//! Each canonical field is looked up through an ordered list of paths
//! ([`FieldMapping`]); the first path holding a scalar wins. A path is tried as a
//! literal key first (`"source.name": ...`) and then as a nested walk
//! (`{"source": {"name": ...}}`). Every leaf not consumed by the mapping is flattened
//! into metadata with dot notation; arrays are stored as their JSON text, nulls are skipped.
//!
//! ```ignore
//! let mapper = JsonMapper::default();
//! let event = mapper.map_slice(br#"{"@timestamp":"2026-01-15T12:00:00Z","source":"api","msg":"hi"}"#)?;
//! assert_eq!(event.message(), "hi");
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use ironstream_core::config::FieldMappingConfig;
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;
use serde_json::Value;
use tracing::debug;

use crate::severity;

const FORMAT: &str = "json";

/// Ordered lookup paths per canonical field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
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

impl FieldMapping {
    /// Builds the mapping from the `[normalizer.fields]` section.
    pub fn from_core(config: &FieldMappingConfig) -> Self {
        Self {
            id: config.id.clone(),
            timestamp: config.timestamp.clone(),
            source: config.source.clone(),
            event_type: config.event_type.clone(),
            severity: config.severity.clone(),
            message: config.message.clone(),
            user_id: config.user_id.clone(),
            workflow_id: config.workflow_id.clone(),
            execution_id: config.execution_id.clone(),
            tags: config.tags.clone(),
        }
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::from_core(&FieldMappingConfig::default())
    }
}

/// Maps JSON objects to canonical events
#[derive(Debug, Clone, Default)]
pub struct JsonMapper {
    mapping: FieldMapping,
}

impl JsonMapper {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    /// Parses JSON bytes and maps the top-level object.
    pub fn map_slice(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| FormatError::malformed(FORMAT, e.column(), e.to_string()))?;
        self.map_value(&value)
    }

    /// Maps an already-parsed JSON object.
    pub fn map_value(&self, value: &Value) -> Result<CanonicalEvent, FormatError> {
        self.map_value_with(value, &|key: &str| Some(key.to_owned()))
    }

    /// Maps a JSON object, passing every flattened metadata key through `rekey`.
    ///
    /// `rekey` returns the key to store, or `None` to drop the entry. Format-specific
    /// parsers use it to undo their own envelope (ECS `labels.*`, for instance).
    pub fn map_value_with(
        &self,
        value: &Value,
        rekey: &dyn Fn(&str) -> Option<String>,
    ) -> Result<CanonicalEvent, FormatError> {
        if !value.is_object() {
            return Err(FormatError::malformed(
                FORMAT,
                0,
                "expected JSON object at top level",
            ));
        }

        let mut consumed = HashSet::new();

        let (ts_path, ts_text) = first_scalar(value, &self.mapping.timestamp)
            .ok_or_else(|| FormatError::MissingField("timestamp".to_owned()))?;
        let timestamp = parse_timestamp(&ts_text).ok_or_else(|| {
            FormatError::malformed(FORMAT, 0, format!("invalid timestamp '{ts_text}'"))
        })?;
        consumed.insert(ts_path);

        let source = take(value, &self.mapping.source, &mut consumed)
            .ok_or_else(|| FormatError::MissingField("source".to_owned()))?;
        let message = take(value, &self.mapping.message, &mut consumed)
            .ok_or_else(|| FormatError::MissingField("message".to_owned()))?;

        let mut builder = CanonicalEvent::builder(timestamp, source, message);

        if let Some(id) = take(value, &self.mapping.id, &mut consumed) {
            builder = builder.id(id);
        }
        if let Some(event_type) = take(value, &self.mapping.event_type, &mut consumed) {
            builder = builder.event_type(event_type);
        }
        if let Some(raw_sev) = take(value, &self.mapping.severity, &mut consumed) {
            match severity::parse(&raw_sev) {
                Some(sev) => builder = builder.severity(sev),
                None => debug!(value = %raw_sev, "unknown severity, defaulting to medium"),
            }
        }
        if let Some(user) = take(value, &self.mapping.user_id, &mut consumed) {
            builder = builder.user_id(user);
        }
        if let Some(workflow) = take(value, &self.mapping.workflow_id, &mut consumed) {
            builder = builder.workflow_id(workflow);
        }
        if let Some(execution) = take(value, &self.mapping.execution_id, &mut consumed) {
            builder = builder.execution_id(execution);
        }
        if let Some((path, tags)) = first_tags(value, &self.mapping.tags) {
            consumed.insert(path);
            builder = builder.tags(tags);
        }

        let mut metadata = BTreeMap::new();
        flatten(value, "", &consumed, &mut metadata);
        let metadata = metadata
            .into_iter()
            .filter_map(|(k, v)| rekey(&k).map(|k| (k, v)))
            .collect();

        builder.metadata_map(metadata).build()
    }
}

/// Resolves `path` as a literal key, then as a nested walk.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = value.get(path) {
        return Some(v);
    }
    if !path.contains('.') {
        return None;
    }
    path.split('.').try_fold(value, |current, part| current.get(part))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_scalar(value: &Value, paths: &[String]) -> Option<(String, String)> {
    paths.iter().find_map(|path| {
        lookup(value, path)
            .and_then(scalar_text)
            .map(|text| (path.clone(), text))
    })
}

fn take(value: &Value, paths: &[String], consumed: &mut HashSet<String>) -> Option<String> {
    let (path, text) = first_scalar(value, paths)?;
    consumed.insert(path);
    Some(text)
}

/// Tags come from a string array or a comma-separated string.
fn first_tags(value: &Value, paths: &[String]) -> Option<(String, Vec<String>)> {
    paths.iter().find_map(|path| {
        let tags: Vec<String> = match lookup(value, path)? {
            Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
            Value::String(s) => split_csv(s),
            _ => return None,
        };
        Some((path.clone(), tags))
    })
}

pub(crate) fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

fn flatten(
    value: &Value,
    prefix: &str,
    consumed: &HashSet<String>,
    out: &mut BTreeMap<String, String>,
) {
    let Some(obj) = value.as_object() else {
        return;
    };
    for (key, val) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if consumed.contains(&name) {
            continue;
        }
        match val {
            Value::Object(_) => flatten(val, &name, consumed, out),
            Value::Array(items) => {
                if let Ok(text) = serde_json::to_string(items) {
                    out.insert(name, text);
                }
            }
            Value::Null => {}
            Value::String(s) => {
                out.insert(name, s.clone());
            }
            Value::Number(n) => {
                out.insert(name, n.to_string());
            }
            Value::Bool(b) => {
                out.insert(name, b.to_string());
            }
        }
    }
}

/// Parses an RFC 3339 string or a Unix epoch.
///
/// Epoch values with more than ten digits are read as milliseconds, shorter ones as seconds.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let n = text.parse::<i64>().ok()?;
    if n.unsigned_abs() > 9_999_999_999 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironstream_core::types::Severity;
    use serde_json::json;

    fn mapper() -> JsonMapper {
        JsonMapper::default()
    }

    #[test]
    fn maps_primary_field_names() {
        let event = mapper()
            .map_value(&json!({
                "timestamp": "2026-01-15T12:00:00.250Z",
                "source": "auth-service",
                "event_type": "auth_failure",
                "severity": "high",
                "message": "bad password",
                "user_id": "alice",
                "tags": ["auth", "login"],
                "source_ip": "10.0.0.1",
            }))
            .unwrap();
        assert_eq!(event.source(), "auth-service");
        assert_eq!(event.event_type(), "auth_failure");
        assert_eq!(event.severity(), Severity::High);
        assert_eq!(event.user_id(), Some("alice"));
        assert_eq!(event.timestamp().timestamp_subsec_millis(), 250);
        assert!(event.tags().contains("login"));
        assert_eq!(event.metadata().get("source_ip").map(String::as_str), Some("10.0.0.1"));
        assert!(!event.metadata().contains_key("message"));
    }

    #[test]
    fn maps_fallback_and_nested_names() {
        let event = mapper()
            .map_value(&json!({
                "@timestamp": 1_768_478_400_000i64,
                "source": {"name": "gateway", "ip": "192.0.2.1"},
                "event": {"action": "login", "severity": 9},
                "msg": "hello",
                "user": {"id": "bob"},
                "workflow": {"id": "wf-1"},
                "execution": {"id": "ex-9"},
            }))
            .unwrap();
        assert_eq!(event.source(), "gateway");
        assert_eq!(event.event_type(), "login");
        assert_eq!(event.severity(), Severity::Critical);
        assert_eq!(event.message(), "hello");
        assert_eq!(event.user_id(), Some("bob"));
        assert_eq!(event.actors().workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(event.actors().execution_id.as_deref(), Some("ex-9"));
        assert_eq!(event.metadata()["source.ip"], "192.0.2.1");
        assert!(!event.metadata().contains_key("source.name"));
        assert!(!event.metadata().contains_key("event.action"));
    }

    #[test]
    fn literal_dotted_key_wins() {
        let event = mapper()
            .map_value(&json!({
                "time": "2026-01-15T12:00:00Z",
                "source.name": "flat",
                "message": "m",
            }))
            .unwrap();
        assert_eq!(event.source(), "flat");
    }

    #[test]
    fn missing_required_fields_are_reported() {
        let err = mapper()
            .map_value(&json!({"source": "s", "message": "m"}))
            .unwrap_err();
        assert_eq!(err, FormatError::MissingField("timestamp".to_owned()));

        let err = mapper()
            .map_value(&json!({"timestamp": "2026-01-15T12:00:00Z", "message": "m"}))
            .unwrap_err();
        assert_eq!(err, FormatError::MissingField("source".to_owned()));

        let err = mapper()
            .map_value(&json!({"timestamp": "2026-01-15T12:00:00Z", "source": "s", "message": "  "}))
            .unwrap_err();
        assert_eq!(err, FormatError::MissingField("message".to_owned()));
    }

    #[test]
    fn defaults_severity_and_type() {
        let event = mapper()
            .map_value(&json!({"timestamp": "2026-01-15T12:00:00Z", "source": "s", "message": "m"}))
            .unwrap();
        assert_eq!(event.severity(), Severity::Medium);
        assert_eq!(event.event_type(), "generic");
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        let event = mapper()
            .map_value(&json!({
                "timestamp": "2026-01-15T12:00:00Z", "source": "s", "message": "m", "level": "loud"
            }))
            .unwrap();
        assert_eq!(event.severity(), Severity::Medium);
    }

    #[test]
    fn invalid_timestamp_is_malformed() {
        let err = mapper()
            .map_value(&json!({"timestamp": "yesterday", "source": "s", "message": "m"}))
            .unwrap_err();
        assert_eq!(err.reason_code(), "malformed");
    }

    #[test]
    fn non_object_is_malformed() {
        assert!(mapper().map_slice(b"[1,2,3]").is_err());
        assert!(mapper().map_slice(b"{not json").is_err());
    }

    #[test]
    fn arrays_and_nulls_in_metadata() {
        let event = mapper()
            .map_value(&json!({
                "timestamp": "2026-01-15T12:00:00Z", "source": "s", "message": "m",
                "ports": [22, 443], "gone": null, "ok": true,
            }))
            .unwrap();
        assert_eq!(event.metadata()["ports"], "[22,443]");
        assert_eq!(event.metadata()["ok"], "true");
        assert!(!event.metadata().contains_key("gone"));
    }

    #[test]
    fn custom_mapping_is_honoured() {
        let mut mapping = FieldMapping::default();
        mapping.message = vec!["text".to_owned()];
        let event = JsonMapper::new(mapping)
            .map_value(&json!({"timestamp": "2026-01-15T12:00:00Z", "source": "s", "text": "custom"}))
            .unwrap();
        assert_eq!(event.message(), "custom");
    }

    #[test]
    fn rekey_can_rename_and_drop() {
        let event = mapper()
            .map_value_with(
                &json!({
                    "timestamp": "2026-01-15T12:00:00Z", "source": "s", "message": "m",
                    "labels": {"team": "red"}, "noise": "x",
                }),
                &|k: &str| match k {
                    "noise" => None,
                    other => Some(other.strip_prefix("labels.").unwrap_or(other).to_owned()),
                },
            )
            .unwrap();
        assert_eq!(event.metadata()["team"], "red");
        assert!(!event.metadata().contains_key("noise"));
    }

    #[test]
    fn parse_timestamp_variants() {
        assert!(parse_timestamp("2026-01-15T12:00:00+09:00").is_some());
        let secs = parse_timestamp("1768478400").unwrap();
        let millis = parse_timestamp("1768478400000").unwrap();
        assert_eq!(secs, millis);
        assert!(parse_timestamp("not a time").is_none());
    }
}
