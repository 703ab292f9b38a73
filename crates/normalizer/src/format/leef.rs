//! IBM QRadar Log Event Extended Format, version 2.0.
//!
//! ```text
//! LEEF:2.0|Ironstream|ironstream|0.1.0|auth_failure|x09|devTime=1768478400000<TAB>sev=8<TAB>...
//! ```
//!
//! Attributes are tab-delimited. Canonical attributes come first in a fixed order,
//! then metadata sorted by key. Values escape `\`, tab and line breaks.
//! Parsing also accepts LEEF 1.0 and custom delimiters.

use std::collections::BTreeMap;

use bytes::Bytes;
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;

use super::{
    PRODUCT, PRODUCT_VERSION, VENDOR, WireFormat, escape, sanitize_key, split_unescaped,
    unescape, utf8,
};
use crate::json::{parse_timestamp, split_csv};
use crate::severity;

const FORMAT: &str = "leef";

const KEY_TIME: &str = "devTime";
const KEY_SEV: &str = "sev";
const KEY_CATEGORY: &str = "cat";
const KEY_ID: &str = "externalId";
const KEY_SOURCE: &str = "source";
const KEY_USER: &str = "usrName";
const KEY_WORKFLOW: &str = "workflowId";
const KEY_EXECUTION: &str = "executionId";
const KEY_TAGS: &str = "tags";
const KEY_MESSAGE: &str = "msg";

const RESERVED: &[&str] = &[
    KEY_TIME,
    KEY_SEV,
    KEY_CATEGORY,
    KEY_ID,
    KEY_SOURCE,
    KEY_USER,
    KEY_WORKFLOW,
    KEY_EXECUTION,
    KEY_TAGS,
    KEY_MESSAGE,
];

const META_PREFIX: &str = "meta.";

/// LEEF renderer / parser
#[derive(Debug, Clone, Copy, Default)]
pub struct LeefFormat;

fn is_key_char(c: char) -> bool {
    !c.is_whitespace() && c != '=' && c != '\\'
}

/// Parses the LEEF 2.0 delimiter field: empty (tab), a single character, or hex (`x09`, `0x09`).
fn parse_delimiter(field: &str) -> Option<char> {
    let field = field.trim_matches(' ');
    if field.is_empty() {
        return Some('\t');
    }
    let hex = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("x"))
        .or_else(|| field.strip_prefix("\\x"));
    if let Some(hex) = hex {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    let mut chars = field.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

impl WireFormat for LeefFormat {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn render(&self, event: &CanonicalEvent) -> Bytes {
        let mut attrs: Vec<(String, String)> = vec![
            (
                KEY_TIME.to_owned(),
                event.timestamp().timestamp_millis().to_string(),
            ),
            (
                KEY_SEV.to_owned(),
                severity::to_scale(event.severity()).to_string(),
            ),
            (KEY_CATEGORY.to_owned(), event.event_type().to_owned()),
            (KEY_ID.to_owned(), event.id().to_owned()),
            (KEY_SOURCE.to_owned(), event.source().to_owned()),
        ];
        let actors = event.actors();
        let optional = [
            (KEY_USER, actors.user_id.clone()),
            (KEY_WORKFLOW, actors.workflow_id.clone()),
            (KEY_EXECUTION, actors.execution_id.clone()),
            (
                KEY_TAGS,
                (!event.tags().is_empty())
                    .then(|| event.tags().iter().cloned().collect::<Vec<_>>().join(",")),
            ),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                attrs.push((key.to_owned(), value));
            }
        }
        attrs.push((KEY_MESSAGE.to_owned(), event.message().to_owned()));

        let mut metadata = BTreeMap::new();
        for (key, value) in event.metadata() {
            let key = sanitize_key(key, is_key_char);
            if key.is_empty() {
                continue;
            }
            let key = if RESERVED.contains(&key.as_str()) || key.starts_with(META_PREFIX) {
                format!("{META_PREFIX}{key}")
            } else {
                key
            };
            metadata.entry(key).or_insert_with(|| value.clone());
        }
        attrs.extend(metadata);

        let mut out = format!(
            "LEEF:2.0|{VENDOR}|{PRODUCT}|{PRODUCT_VERSION}|{}|x09|",
            escape(event.event_type(), &['|']),
        );
        let body = attrs
            .iter()
            .map(|(k, v)| format!("{k}={}", escape(v, &['\t'])))
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&body);
        Bytes::from(out)
    }

    fn parse(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let text = utf8(FORMAT, raw)?.trim_end_matches(['\r', '\n']);
        let body = text
            .strip_prefix("LEEF:")
            .ok_or_else(|| FormatError::malformed(FORMAT, 0, "missing 'LEEF:' prefix"))?;

        let is_v2 = body.starts_with('2');
        let header_fields = if is_v2 { 7 } else { 6 };
        let parts = split_unescaped(body, '|', header_fields);
        if parts.len() < header_fields {
            return Err(FormatError::malformed(
                FORMAT,
                text.len(),
                format!(
                    "expected {} header fields, found {}",
                    header_fields - 1,
                    parts.len()
                ),
            ));
        }

        let event_id = unescape(parts[4].1);
        let (delimiter, (attr_offset, attr_text)) = if is_v2 {
            let delim = parse_delimiter(parts[5].1).ok_or_else(|| {
                FormatError::malformed(
                    FORMAT,
                    5 + parts[5].0,
                    format!("invalid delimiter '{}'", parts[5].1),
                )
            })?;
            (delim, parts[6])
        } else {
            ('\t', parts[5])
        };

        let mut attrs = BTreeMap::new();
        for (rel, item) in split_unescaped(attr_text, delimiter, usize::MAX) {
            if item.is_empty() {
                continue;
            }
            let (key, value) = item.split_once('=').ok_or_else(|| {
                FormatError::malformed(
                    FORMAT,
                    5 + attr_offset + rel,
                    format!("attribute without '=': '{item}'"),
                )
            })?;
            attrs.insert(key.trim().to_owned(), unescape(value));
        }

        let ts_text = attrs
            .remove(KEY_TIME)
            .ok_or_else(|| FormatError::MissingField("timestamp".to_owned()))?;
        let timestamp = parse_timestamp(&ts_text).ok_or_else(|| {
            FormatError::malformed(FORMAT, 0, format!("invalid devTime '{ts_text}'"))
        })?;
        attrs.remove("devTimeFormat");

        let source = attrs
            .remove(KEY_SOURCE)
            .or_else(|| attrs.remove("identHostName"))
            .unwrap_or_default();
        let message = attrs.remove(KEY_MESSAGE).unwrap_or_default();
        let event_type = attrs.remove(KEY_CATEGORY).unwrap_or(event_id);
        let sev = attrs
            .remove(KEY_SEV)
            .and_then(|s| severity::parse(&s))
            .unwrap_or_default();

        let mut builder = CanonicalEvent::builder(timestamp, source, message)
            .event_type(event_type)
            .severity(sev);
        if let Some(id) = attrs.remove(KEY_ID) {
            builder = builder.id(id);
        }
        if let Some(user) = attrs.remove(KEY_USER) {
            builder = builder.user_id(user);
        }
        if let Some(workflow) = attrs.remove(KEY_WORKFLOW) {
            builder = builder.workflow_id(workflow);
        }
        if let Some(execution) = attrs.remove(KEY_EXECUTION) {
            builder = builder.execution_id(execution);
        }
        if let Some(tags) = attrs.remove(KEY_TAGS) {
            builder = builder.tags(split_csv(&tags));
        }

        let metadata = attrs
            .into_iter()
            .map(|(k, v)| match k.strip_prefix(META_PREFIX) {
                Some(stripped) => (stripped.to_owned(), v),
                None => (k, v),
            })
            .collect();
        builder.metadata_map(metadata).build()
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
            "billing",
            "export\tcompleted\nok",
        )
        .id("evt-2")
        .event_type("data_export")
        .severity(Severity::Low)
        .execution_id("ex-1")
        .metadata("rows", "1200")
        .metadata("msg", "shadowed")
        .build()
        .unwrap()
    }

    #[test]
    fn render_layout() {
        let text = String::from_utf8(LeefFormat.render(&event()).to_vec()).unwrap();
        assert!(text.starts_with("LEEF:2.0|Ironstream|ironstream|"));
        assert!(text.contains("|data_export|x09|devTime="));
        assert!(text.contains("\tsev=3\t"));
        assert!(text.contains("msg=export\\tcompleted\\nok"));
        assert!(text.contains("\tmeta.msg=shadowed"));
        assert!(!text.contains('\n'));
    }

    #[test]
    fn parse_restores_rendered_event() {
        let original = event();
        let parsed = LeefFormat.parse(&LeefFormat.render(&original)).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_leef_1_0() {
        let line = "LEEF:1.0|Microsoft|MSExchange|4.0 SP1|15345|source=mail01\tdevTime=1768478400000\tmsg=user logged in\tsev=2\tsrc=192.0.2.10";
        let event = LeefFormat.parse(line.as_bytes()).unwrap();
        assert_eq!(event.event_type(), "15345");
        assert_eq!(event.source(), "mail01");
        assert_eq!(event.severity(), Severity::Low);
        assert_eq!(event.metadata()["src"], "192.0.2.10");
    }

    #[test]
    fn parse_custom_delimiter() {
        let line = "LEEF:2.0|V|P|1|login|^|devTime=1768478400000^source=vpn^msg=ok^sev=9";
        let event = LeefFormat.parse(line.as_bytes()).unwrap();
        assert_eq!(event.severity(), Severity::Critical);
        assert_eq!(event.message(), "ok");
    }

    #[test]
    fn delimiter_forms() {
        assert_eq!(parse_delimiter("x09"), Some('\t'));
        assert_eq!(parse_delimiter("0x5E"), Some('^'));
        assert_eq!(parse_delimiter(""), Some('\t'));
        assert_eq!(parse_delimiter("|"), Some('|'));
        assert_eq!(parse_delimiter("ab"), None);
    }

    #[test]
    fn attribute_without_equals_is_malformed() {
        let err = LeefFormat
            .parse(b"LEEF:2.0|V|P|1|e|x09|devTime=1\tgarbage")
            .unwrap_err();
        assert_eq!(err.reason_code(), "malformed");
    }

    #[test]
    fn missing_message_is_reported() {
        let err = LeefFormat
            .parse(b"LEEF:2.0|V|P|1|e|x09|devTime=1768478400000\tsource=s")
            .unwrap_err();
        assert_eq!(err, FormatError::MissingField("message".to_owned()));
    }
}
