//! RFC 5424 syslog lines.
//!
//! ```text
//! <106>1 2026-01-15T12:00:00.000Z auth-service ironstream - auth_failure [ironstream@32473 event_type="auth_failure" id="..." severity="high" source="auth-service" user_id="alice"][meta@32473 source_ip="10.0.0.1"] login failed
//! ```
//!
//! The `ironstream@32473` element carries every canonical field, so the header only
//! has to be valid syslog: HOSTNAME and MSGID are sanitized copies of source and event
//! type. Metadata travels in a second `meta@32473` element.
//!
//! Parsing also takes foreign RFC 5424 lines (header fields fill the gaps, foreign SD
//! params become `sdid.name` metadata) and BSD RFC 3164 lines on a best-effort basis.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;

use super::{PRODUCT, WireFormat, escape, unescape, utf8};
use crate::json::split_csv;
use crate::severity;

const FORMAT: &str = "syslog";

/// SD-ID of the element holding canonical fields.
pub const SD_ID: &str = "ironstream@32473";

/// SD-ID of the element holding metadata.
pub const META_SD_ID: &str = "meta@32473";

/// Facility 13 (log audit).
const FACILITY: u8 = 13;

const MAX_PRI: u8 = 191;
const MAX_HOSTNAME: usize = 255;
const MAX_MSGID: usize = 32;
const BSD_TIMESTAMP_LEN: usize = 15;
const NIL: &str = "-";
const BOM: char = '\u{feff}';

/// RFC 5424 renderer / parser
#[derive(Debug, Clone, Copy, Default)]
pub struct SyslogFormat;

/// One `[id name="value" ...]` element.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SdElement {
    id: String,
    params: Vec<(String, String)>,
}

/// Printable US-ASCII, truncated; `-` when nothing is left.
fn header_field(value: &str, max: usize) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_graphic())
        .take(max)
        .collect();
    if cleaned.is_empty() {
        NIL.to_owned()
    } else {
        cleaned
    }
}

fn param_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_graphic() && !matches!(c, '=' | ']' | '"') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape_param(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | '"' | ']' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn write_element(out: &mut String, id: &str, params: &BTreeMap<String, String>) {
    out.push('[');
    out.push_str(id);
    for (name, value) in params {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_param(value));
        out.push('"');
    }
    out.push(']');
}

impl WireFormat for SyslogFormat {
    fn format_name(&self) -> &'static str {
        FORMAT
    }

    fn render(&self, event: &CanonicalEvent) -> Bytes {
        let pri = FACILITY * 8 + severity::to_syslog(event.severity());

        let mut fields = BTreeMap::new();
        fields.insert("event_type".to_owned(), event.event_type().to_owned());
        fields.insert("id".to_owned(), event.id().to_owned());
        fields.insert("severity".to_owned(), event.severity().as_str().to_owned());
        fields.insert("source".to_owned(), event.source().to_owned());
        let actors = event.actors();
        let optional = [
            ("user_id", actors.user_id.as_ref()),
            ("workflow_id", actors.workflow_id.as_ref()),
            ("execution_id", actors.execution_id.as_ref()),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                fields.insert(name.to_owned(), value.clone());
            }
        }
        if !event.tags().is_empty() {
            let tags = event.tags().iter().cloned().collect::<Vec<_>>().join(",");
            fields.insert("tags".to_owned(), tags);
        }

        let mut out = format!(
            "<{pri}>1 {} {} {PRODUCT} {NIL} {} ",
            event.timestamp_rfc3339(),
            header_field(event.source(), MAX_HOSTNAME),
            header_field(event.event_type(), MAX_MSGID),
        );
        write_element(&mut out, SD_ID, &fields);

        if !event.metadata().is_empty() {
            let mut meta = BTreeMap::new();
            for (key, value) in event.metadata() {
                let name = param_name(key);
                if !name.is_empty() {
                    meta.entry(name).or_insert_with(|| value.clone());
                }
            }
            write_element(&mut out, META_SD_ID, &meta);
        }

        out.push(' ');
        out.push_str(&escape(event.message(), &[]));
        Bytes::from(out)
    }

    fn parse(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError> {
        let text = utf8(FORMAT, raw)?.trim_end_matches(['\r', '\n']);
        let rest = text
            .strip_prefix('<')
            .ok_or_else(|| FormatError::malformed(FORMAT, 0, "missing '<PRI>'"))?;
        let close = rest
            .find('>')
            .filter(|&idx| (1..=3).contains(&idx))
            .ok_or_else(|| FormatError::malformed(FORMAT, 1, "unterminated PRI"))?;
        let pri = rest[..close]
            .parse::<u8>()
            .ok()
            .filter(|&p| p <= MAX_PRI)
            .ok_or_else(|| {
                FormatError::malformed(FORMAT, 1, format!("invalid PRI '{}'", &rest[..close]))
            })?;

        let body = &rest[close + 1..];
        let offset = close + 2;
        match body.strip_prefix("1 ") {
            Some(v1) => parse_rfc5424(pri, v1, offset + 2),
            None => parse_rfc3164(pri, body),
        }
    }
}

fn parse_rfc5424(pri: u8, body: &str, offset: usize) -> Result<CanonicalEvent, FormatError> {
    let fields: Vec<&str> = body.splitn(6, ' ').collect();
    if fields.len() < 5 {
        return Err(FormatError::malformed(
            FORMAT,
            offset + body.len(),
            format!("expected 6 header fields, found {}", fields.len() + 1),
        ));
    }
    let (ts, host, app, procid, msgid) = (fields[0], fields[1], fields[2], fields[3], fields[4]);
    let sd_offset = offset + fields[..5].iter().map(|f| f.len() + 1).sum::<usize>();

    if ts == NIL {
        return Err(FormatError::MissingField("timestamp".to_owned()));
    }
    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map_err(|e| FormatError::malformed(FORMAT, offset, format!("invalid timestamp '{ts}': {e}")))?
        .with_timezone(&Utc);

    let (elements, msg) = parse_structured_data(fields.get(5).copied().unwrap_or(NIL), sd_offset)?;
    let msg = msg.strip_prefix(BOM).unwrap_or(msg);

    let mut own: Option<BTreeMap<String, String>> = None;
    let mut metadata = BTreeMap::new();
    for element in elements {
        if element.id == SD_ID {
            own = Some(element.params.into_iter().collect());
        } else if element.id == META_SD_ID {
            metadata.extend(element.params);
        } else {
            for (name, value) in element.params {
                metadata.insert(format!("{}.{name}", element.id), value);
            }
        }
    }

    let foreign = own.is_none();
    let mut fields = own.unwrap_or_default();
    let non_nil = |v: &str| (v != NIL).then(|| v.to_owned());

    let source = fields
        .remove("source")
        .or_else(|| non_nil(host))
        .unwrap_or_default();
    let message = if foreign { msg.to_owned() } else { unescape(msg) };
    let sev = fields
        .remove("severity")
        .and_then(|s| severity::parse(&s))
        .unwrap_or_else(|| severity::from_syslog(pri & 0x07));

    let mut builder = CanonicalEvent::builder(timestamp, source, message).severity(sev);
    if let Some(event_type) = fields.remove("event_type").or_else(|| non_nil(msgid)) {
        builder = builder.event_type(event_type);
    }
    if let Some(id) = fields.remove("id") {
        builder = builder.id(id);
    }
    if let Some(user) = fields.remove("user_id") {
        builder = builder.user_id(user);
    }
    if let Some(workflow) = fields.remove("workflow_id") {
        builder = builder.workflow_id(workflow);
    }
    if let Some(execution) = fields.remove("execution_id") {
        builder = builder.execution_id(execution);
    }
    if let Some(tags) = fields.remove("tags") {
        builder = builder.tags(split_csv(&tags));
    }

    if foreign {
        metadata
            .entry("syslog.facility".to_owned())
            .or_insert_with(|| (pri >> 3).to_string());
        if let Some(app) = non_nil(app) {
            metadata.entry("syslog.app_name".to_owned()).or_insert(app);
        }
        if let Some(procid) = non_nil(procid) {
            metadata.entry("syslog.procid".to_owned()).or_insert(procid);
        }
    }
    // Unknown params in our own element are kept rather than dropped.
    metadata.extend(fields);

    builder.metadata_map(metadata).build()
}

/// BSD syslog: `Mmm dd hh:mm:ss host tag[pid]: message`.
///
/// The year is assumed to be the current one. An unreadable timestamp falls back to
/// the receive time and the whole body is treated as `host tag: message`.
fn parse_rfc3164(pri: u8, body: &str) -> Result<CanonicalEvent, FormatError> {
    let parsed = body.get(..BSD_TIMESTAMP_LEN).and_then(|ts| {
        let with_year = format!("{} {ts}", Utc::now().year());
        NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S").ok()
    });
    let (timestamp, rest) = match parsed {
        Some(naive) => (naive.and_utc(), body[BSD_TIMESTAMP_LEN..].trim_start()),
        None => (Utc::now(), body),
    };

    let (host, tag_and_msg) = rest.split_once(' ').unwrap_or(("", rest));
    let (tag, message) = match tag_and_msg.split_once(':') {
        Some((tag, msg)) if !tag.contains(' ') => (tag, msg.trim_start()),
        _ => ("", tag_and_msg),
    };
    let (app, procid) = match tag.split_once('[') {
        Some((app, pid)) => (app, pid.strip_suffix(']').unwrap_or(pid)),
        None => (tag, ""),
    };

    let mut builder = CanonicalEvent::builder(timestamp, host, message)
        .severity(severity::from_syslog(pri & 0x07))
        .metadata("syslog.facility", (pri >> 3).to_string());
    if !app.is_empty() {
        builder = builder
            .event_type(app)
            .metadata("syslog.app_name", app);
    }
    if !procid.is_empty() {
        builder = builder.metadata("syslog.procid", procid);
    }
    builder.build()
}

/// Splits `input` into SD elements and the message that follows them.
fn parse_structured_data(input: &str, offset: usize) -> Result<(Vec<SdElement>, &str), FormatError> {
    if let Some(rest) = input.strip_prefix(NIL) {
        return Ok((Vec::new(), rest.strip_prefix(' ').unwrap_or(rest)));
    }

    let mut elements = Vec::new();
    let mut pos = 0;
    while input[pos..].starts_with('[') {
        let (element, next) = parse_element(input, pos + 1, offset)?;
        elements.push(element);
        pos = next;
    }
    if elements.is_empty() {
        return Err(FormatError::malformed(
            FORMAT,
            offset,
            "expected '-' or '[' for structured data",
        ));
    }
    let rest = &input[pos..];
    Ok((elements, rest.strip_prefix(' ').unwrap_or(rest)))
}

/// Parses one element starting just after its `[`; returns the index after its `]`.
fn parse_element(input: &str, start: usize, offset: usize) -> Result<(SdElement, usize), FormatError> {
    let malformed = |at: usize, reason: &str| FormatError::malformed(FORMAT, offset + at, reason);

    let id_len = input[start..]
        .find([' ', ']'])
        .ok_or_else(|| malformed(start, "unterminated SD element"))?;
    let id = &input[start..start + id_len];
    if id.is_empty() {
        return Err(malformed(start, "empty SD-ID"));
    }

    let mut params = Vec::new();
    let mut pos = start + id_len;
    loop {
        let rest = &input[pos..];
        if let Some(after) = rest.strip_prefix(']') {
            let next = input.len() - after.len();
            return Ok((
                SdElement {
                    id: id.to_owned(),
                    params,
                },
                next,
            ));
        }
        let Some(trimmed) = rest.strip_prefix(' ') else {
            return Err(malformed(pos, "expected ' ' or ']' in SD element"));
        };
        pos += 1;
        if trimmed.starts_with(' ') {
            continue;
        }

        let eq = trimmed
            .find('=')
            .ok_or_else(|| malformed(pos, "SD param without '='"))?;
        let name = &trimmed[..eq];
        if name.is_empty() || name.contains([' ', ']']) {
            return Err(malformed(pos, "invalid SD param name"));
        }
        pos += eq + 1;
        if !input[pos..].starts_with('"') {
            return Err(malformed(pos, "SD param value must be quoted"));
        }
        pos += 1;

        let mut value = String::new();
        let mut escaped = false;
        let mut closed = None;
        for (idx, ch) in input[pos..].char_indices() {
            if escaped {
                match ch {
                    '"' | '\\' | ']' => value.push(ch),
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                closed = Some(idx);
                break;
            } else {
                value.push(ch);
            }
        }
        let close = closed.ok_or_else(|| malformed(pos, "unterminated SD param value"))?;
        params.push((name.to_owned(), value));
        pos += close + 1;
    }
}
