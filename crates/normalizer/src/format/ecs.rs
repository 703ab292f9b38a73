//! Elastic Common Schema JSON.
//!
//! ```json
//! {"@timestamp":"2026-01-15T12:00:00.000Z","ecs":{"version":"8.11.0"},
//!  "event":{"action":"auth_failure","id":"...","kind":"event","severity":8},
//!  "log":{"level":"high"},"message":"login failed",
//!  "source":{"ip":"10.0.0.1","name":"auth-service"},"user":{"id":"alice"},
//!  "labels":{"tenant":"acme"},"tags":["auth"]}
//! ```
//!
//! Well-known network metadata (`source_ip`, `dst_port`, ...) is lifted into the
//! `source` / `destination` objects; all other metadata lands in `labels`.
//! Parsing runs the generic JSON mapping and then folds the envelope back into metadata.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bytes::Bytes;
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;
use serde_json::{Map, Value, json};

use super::{WireFormat, utf8};
use crate::json::JsonMapper;
use crate::severity;

const FORMAT: &str = "ecs";

/// ECS version written into `ecs.version`.
pub const ECS_VERSION: &str = "8.11.0";

/// (metadata keys, ECS object, ECS field, canonical metadata key on parse)
const NETWORK_FIELDS: [(&[&str], &str, &str, &str); 4] = [
    (&["source_ip", "src_ip"], "source", "ip", "source_ip"),
    (&["source_port", "src_port"], "source", "port", "source_port"),
    (
        &["destination_ip", "dest_ip", "dst_ip"],
        "destination",
        "ip",
        "destination_ip",
    ),
    (
        &["destination_port", "dest_port", "dst_port"],
        "destination",
        "port",
        "destination_port",
    ),
];

/// Envelope-only keys dropped on parse.
const ENVELOPE_KEYS: &[&str] = &["ecs.version", "event.kind", "log.level"];

/// ECS renderer / parser
#[derive(Debug, Clone, Copy, Default)]
pub struct EcsFormat;

impl EcsFormat {
    /// Builds the ECS document for an event.
    pub fn to_value(event: &CanonicalEvent) -> Value {
        let mut labels: BTreeMap<&str, &str> = event
            .metadata()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut source = Map::new();
        source.insert("name".to_owned(), json!(event.source()));
        let mut destination = Map::new();

        for (keys, object, field, _) in NETWORK_FIELDS {
            let Some(key) = keys.iter().find(|k| labels.contains_key(*k)) else {
                continue;
            };
            let Some(raw) = labels.remove(key) else {
                continue;
            };
            let value = match (field, raw.parse::<u16>()) {
                ("port", Ok(port)) => json!(port),
                _ => json!(raw),
            };
            let target = if object == "source" {
                &mut source
            } else {
                &mut destination
            };
            target.insert(field.to_owned(), value);
        }

        let mut doc = Map::new();
        doc.insert("@timestamp".to_owned(), json!(event.timestamp_rfc3339()));
        doc.insert("ecs".to_owned(), json!({ "version": ECS_VERSION }));
        doc.insert(
            "event".to_owned(),
            json!({
                "id": event.id(),
                "action": event.event_type(),
                "kind": "event",
                "severity": severity::to_scale(event.severity()),
            }),
        );
        doc.insert("log".to_owned(), json!({ "level": event.severity().as_str() }));
        doc.insert("message".to_owned(), json!(event.message()));
        doc.insert("source".to_owned(), Value::Object(source));
        if !destination.is_empty() {
            doc.insert("destination".to_owned(), Value::Object(destination));
        }

        let actors = event.actors();
        if let Some(user) = &actors.user_id {
            doc.insert("user".to_owned(), json!({ "id": user }));
        }
        if let Some(workflow) = &actors.workflow_id {
            doc.insert("workflow".to_owned(), json!({ "id": workflow }));
        }
        if let Some(execution) = &actors.execution_id {
            doc.insert("execution".to_owned(), json!({ "id": execution }));
        }
        if !labels.is_empty() {
            doc.insert("labels".to_owned(), json!(labels));
        }
        if !event.tags().is_empty() {
            doc.insert("tags".to_owned(), json!(event.tags()));
        }
        Value::Object(doc)
    }

    /// Maps a parsed ECS document. Used directly by the normalizer's JSON path.
    pub fn from_value(value: &Value) -> Result<CanonicalEvent, FormatError> {
        static MAPPER: OnceLock<JsonMapper> = OnceLock::new();
        MAPPER
            .get_or_init(JsonMapper::default)
            .map_value_with(value, &rekey)
    }

    /// `true` when a JSON object carries the ECS envelope.
    pub fn is_ecs(value: &Value) -> bool {
        value.get("ecs").is_some_and(Value::is_object) && value.get("@timestamp").is_some()
    }
}

fn rekey(key: &str) -> Option<String> {
    if ENVELOPE_KEYS.contains(&key) {
        return None;
    }
    if let Some(label) = key.strip_prefix("labels.") {
        return Some(label.to_owned());
    }
    for (_, object, field, canonical) in NETWORK_FIELDS {
        if key.strip_prefix(object).and_then(|rest| rest.strip_prefix('.')) == Some(field) {
            return Some(canonical.to_owned());
        }
    }
    Some(key.to_owned())
}

impl WireFormat for EcsFormat {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn render(&self, event: &CanonicalEvent) -> Bytes {
        // Serializing a Value built from strings and integers cannot fail.
        Bytes::from(serde_json::to_vec(&Self::to_value(event)).unwrap_or_default())
    }

    fn parse(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let text = utf8(FORMAT, raw)?;
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FormatError::malformed(FORMAT, e.column(), e.to_string()))?;
        Self::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ironstream_core::types::Severity;

    fn event() -> CanonicalEvent {
        CanonicalEvent::builder(
            Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
            "auth-service",
            "login failed",
        )
        .id("evt-3")
        .event_type("auth_failure")
        .severity(Severity::Critical)
        .user_id("alice")
        .workflow_id("wf-1")
        .tag("auth")
        .metadata("src_ip", "10.0.0.1")
        .metadata("dst_port", "443")
        .metadata("tenant", "acme")
        .build()
        .unwrap()
    }

    #[test]
    fn document_shape() {
        let doc = EcsFormat::to_value(&event());
        assert_eq!(doc["@timestamp"], "2026-01-15T12:00:00.000Z");
        assert_eq!(doc["event"]["action"], "auth_failure");
        assert_eq!(doc["event"]["severity"], 10);
        assert_eq!(doc["source"]["ip"], "10.0.0.1");
        assert_eq!(doc["source"]["name"], "auth-service");
        assert_eq!(doc["destination"]["port"], 443);
        assert_eq!(doc["user"]["id"], "alice");
        assert_eq!(doc["labels"]["tenant"], "acme");
        assert!(doc["labels"].get("src_ip").is_none());
        assert_eq!(doc["tags"][0], "auth");
        assert!(EcsFormat::is_ecs(&doc));
    }

    #[test]
    fn parse_restores_core_fields() {
        let original = event();
        let parsed = EcsFormat.parse(&EcsFormat.render(&original)).unwrap();
        assert_eq!(parsed.id(), original.id());
        assert_eq!(parsed.timestamp(), original.timestamp());
        assert_eq!(parsed.source(), original.source());
        assert_eq!(parsed.severity(), original.severity());
        assert_eq!(parsed.message(), original.message());
        assert_eq!(parsed.actors(), original.actors());
        assert_eq!(parsed.tags(), original.tags());
        assert_eq!(parsed.metadata()["source_ip"], "10.0.0.1");
        assert_eq!(parsed.metadata()["destination_port"], "443");
        assert_eq!(parsed.metadata()["tenant"], "acme");
        assert!(!parsed.metadata().contains_key("ecs.version"));
        assert!(!parsed.metadata().contains_key("log.level"));
    }

    #[test]
    fn render_is_deterministic() {
        let e = event();
        assert_eq!(EcsFormat.render(&e), EcsFormat.render(&e));
    }

    #[test]
    fn non_numeric_port_stays_a_string() {
        let e = CanonicalEvent::builder(Utc::now(), "s", "m")
            .metadata("src_port", "ephemeral")
            .build()
            .unwrap();
        assert_eq!(EcsFormat::to_value(&e)["source"]["port"], "ephemeral");
    }
}
