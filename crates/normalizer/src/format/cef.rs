//! ArcSight Common Event Format.
//!
//! ```text
//! CEF:0|Ironstream|ironstream|0.1.0|auth_failure|login failed|8|dvchost=auth externalId=... rt=1768478400000 suser=alice
//! ```
//!
//! Header fields escape `|`; extension values escape `=`; both escape `\` and line breaks.
//! Extension keys are sorted. Canonical fields use standard CEF keys (`rt`, `dvchost`,
//! `suser`, `externalId`) plus labelled custom strings for workflow / execution ids and tags.
//! Metadata keys that collide with those are written with a `meta.` prefix.

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

const FORMAT: &str = "cef";

const KEY_ID: &str = "externalId";
const KEY_TIME: &str = "rt";
const KEY_SOURCE: &str = "dvchost";
const KEY_USER: &str = "suser";

/// (value key, label key, canonical field) for labelled custom strings
const CUSTOM_SLOTS: [(&str, &str, &str); 3] = [
    ("cs1", "cs1Label", "workflow_id"),
    ("cs2", "cs2Label", "execution_id"),
    ("cs3", "cs3Label", "tags"),
];

const RESERVED: &[&str] = &[
    KEY_ID, KEY_TIME, KEY_SOURCE, KEY_USER, "cs1", "cs1Label", "cs2", "cs2Label", "cs3",
    "cs3Label",
];

const META_PREFIX: &str = "meta.";

/// Source host keys accepted on parse, in order.
const SOURCE_KEYS: &[&str] = &[KEY_SOURCE, "shost", "dvc"];

/// CEF renderer / parser
#[derive(Debug, Clone, Copy, Default)]
pub struct CefFormat;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl WireFormat for CefFormat {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn render(&self, event: &CanonicalEvent) -> Bytes {
        let mut ext: BTreeMap<String, String> = BTreeMap::new();
        ext.insert(KEY_ID.to_owned(), event.id().to_owned());
        ext.insert(
            KEY_TIME.to_owned(),
            event.timestamp().timestamp_millis().to_string(),
        );
        ext.insert(KEY_SOURCE.to_owned(), event.source().to_owned());
        if let Some(user) = event.user_id() {
            ext.insert(KEY_USER.to_owned(), user.to_owned());
        }

        let actors = event.actors();
        let tags = (!event.tags().is_empty())
            .then(|| event.tags().iter().cloned().collect::<Vec<_>>().join(","));
        let slot_values = [actors.workflow_id.clone(), actors.execution_id.clone(), tags];
        for ((value_key, label_key, name), value) in CUSTOM_SLOTS.iter().zip(slot_values) {
            if let Some(value) = value {
                ext.insert((*value_key).to_owned(), value);
                ext.insert((*label_key).to_owned(), (*name).to_owned());
            }
        }

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
            ext.entry(key).or_insert_with(|| value.clone());
        }

        let mut out = format!(
            "CEF:0|{VENDOR}|{PRODUCT}|{PRODUCT_VERSION}|{}|{}|{}|",
            escape(event.event_type(), &['|']),
            escape(event.message(), &['|']),
            severity::to_scale(event.severity()),
        );
        let extension = ext
            .iter()
            .map(|(k, v)| format!("{k}={}", escape(v, &['='])))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&extension);
        Bytes::from(out)
    }

    fn parse(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let text = utf8(FORMAT, raw)?.trim_end_matches(['\r', '\n']);
        let body = text
            .strip_prefix("CEF:")
            .ok_or_else(|| FormatError::malformed(FORMAT, 0, "missing 'CEF:' prefix"))?;

        let parts = split_unescaped(body, '|', 8);
        if parts.len() < 8 {
            return Err(FormatError::malformed(
                FORMAT,
                text.len(),
                format!("expected 7 header fields, found {}", parts.len()),
            ));
        }

        let event_type = unescape(parts[4].1);
        let name = unescape(parts[5].1);
        let severity_text = parts[6].1.trim();
        let mut ext: BTreeMap<String, String> =
            parse_extension(parts[7].1, 4 + parts[7].0)?.into_iter().collect();

        let ts_text = ext
            .remove(KEY_TIME)
            .or_else(|| ext.remove("start"))
            .ok_or_else(|| FormatError::MissingField("timestamp".to_owned()))?;
        let timestamp = parse_timestamp(&ts_text).ok_or_else(|| {
            FormatError::malformed(FORMAT, 0, format!("invalid rt '{ts_text}'"))
        })?;

        let source = SOURCE_KEYS
            .iter()
            .find_map(|k| ext.remove(*k))
            .unwrap_or_default();
        let message = if name.trim().is_empty() {
            ext.remove("msg").unwrap_or_default()
        } else {
            ext.remove("msg");
            name
        };

        let mut builder = CanonicalEvent::builder(timestamp, source, message)
            .event_type(event_type)
            .severity(severity::parse(severity_text).unwrap_or_default());

        if let Some(id) = ext.remove(KEY_ID) {
            builder = builder.id(id);
        }
        if let Some(user) = ext.remove(KEY_USER) {
            builder = builder.user_id(user);
        }

        for n in 1..=6 {
            let (value_key, label_key) = (format!("cs{n}"), format!("cs{n}Label"));
            if !(ext.contains_key(&value_key) && ext.contains_key(&label_key)) {
                continue;
            }
            let label = ext.remove(&label_key).unwrap_or_default();
            let value = ext.remove(&value_key).unwrap_or_default();
            builder = match label.as_str() {
                "workflow_id" => builder.workflow_id(value),
                "execution_id" => builder.execution_id(value),
                "tags" => builder.tags(split_csv(&value)),
                _ => builder.metadata(label, value),
            };
        }

        let metadata = ext
            .into_iter()
            .map(|(k, v)| match k.strip_prefix(META_PREFIX) {
                Some(stripped) => (stripped.to_owned(), v),
                None => (k, v),
            })
            .collect();

        builder.metadata_map(metadata).build()
    }
}

/// Splits a CEF extension into raw key / unescaped value pairs.
///
/// A key is the last space-separated token before an unescaped `=`; its value runs
/// up to the space preceding the next key.
fn parse_extension(ext: &str, offset: usize) -> Result<Vec<(String, String)>, FormatError> {
    let mut equals = Vec::new();
    let mut escaped = false;
    for (idx, ch) in ext.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '=' {
            equals.push(idx);
        }
    }

    if equals.is_empty() {
        if ext.trim().is_empty() {
            return Ok(Vec::new());
        }
        return Err(FormatError::malformed(
            FORMAT,
            offset,
            "extension has no key=value pairs",
        ));
    }

    let mut pairs = Vec::with_capacity(equals.len());
    let mut region_start = 0;
    let mut pending: Option<String> = None;
    for eq in equals {
        let region = &ext[region_start..eq];
        let key_start = region.rfind(' ').map_or(0, |p| p + 1);
        let key = region[key_start..].trim();
        if key.is_empty() {
            return Err(FormatError::malformed(
                FORMAT,
                offset + eq,
                "empty extension key",
            ));
        }
        if let Some(prev) = pending.take() {
            let value = region[..key_start].trim_end_matches(' ');
            pairs.push((prev, unescape(value)));
        }
        pending = Some(key.to_owned());
        region_start = eq + 1;
    }
    if let Some(prev) = pending {
        let value = ext[region_start..].trim_end_matches(' ');
        pairs.push((prev, unescape(value)));
    }
    Ok(pairs)
}
