//! Wire formats: canonical event ↔ bytes.
//!
//! Every format implements [`WireFormat`]. Rendering is deterministic: identical
//! events always render identical bytes (fixed header order, sorted metadata).
//! Each `parse` accepts at least what the matching `render` produces, so a rendered
//! line normalizes back to the same timestamp, source, severity and message.
//!
//! | kind | shape |
//! |---|---|
//! | [`FormatKind::Cef`] | `CEF:0\|vendor\|product\|version\|type\|message\|sev\|k=v ...` |
//! | [`FormatKind::Leef`] | `LEEF:2.0\|vendor\|product\|version\|type\|x09\|k=v<TAB>...` |
//! | [`FormatKind::Ecs`] | JSON with `@timestamp`, `event`, `source`, `destination`, `user` |
//! | [`FormatKind::Syslog`] | RFC 5424 line with an `ironstream@32473` SD element |

pub mod cef;
pub mod ecs;
pub mod leef;
pub mod syslog;

pub use cef::CefFormat;
pub use ecs::EcsFormat;
pub use leef::LeefFormat;
pub use syslog::SyslogFormat;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use ironstream_core::error::FormatError;
use ironstream_core::event::CanonicalEvent;

/// Vendor written into CEF / LEEF headers.
pub(crate) const VENDOR: &str = "Ironstream";

/// Product written into CEF / LEEF headers.
pub(crate) const PRODUCT: &str = "ironstream";

/// Product version written into CEF / LEEF headers.
pub(crate) const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Renders and parses one wire format.
pub trait WireFormat: Send + Sync {
    /// Stable lowercase name (`cef`, `leef`, `ecs`, `syslog`).
    fn format_name(&self) -> &'static str;

    /// Renders one event as one record (no trailing newline).
    fn render(&self, event: &CanonicalEvent) -> Bytes;

    /// Parses one record back into a canonical event.
    fn parse(&self, raw: &[u8]) -> Result<CanonicalEvent, FormatError>;
}

/// Wire format selector used in destination config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Cef,
    Leef,
    Ecs,
    Syslog,
}

impl FormatKind {
    pub const ALL: [FormatKind; 4] = [Self::Cef, Self::Leef, Self::Ecs, Self::Syslog];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cef => "cef",
            Self::Leef => "leef",
            Self::Ecs => "ecs",
            Self::Syslog => "syslog",
        }
    }

    /// The shared, stateless implementation for this kind.
    pub fn wire_format(&self) -> &'static dyn WireFormat {
        match self {
            Self::Cef => &CefFormat,
            Self::Leef => &LeefFormat,
            Self::Ecs => &EcsFormat,
            Self::Syslog => &SyslogFormat,
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cef" => Ok(Self::Cef),
            "leef" => Ok(Self::Leef),
            "ecs" => Ok(Self::Ecs),
            "syslog" | "rfc5424" => Ok(Self::Syslog),
            other => Err(FormatError::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// Renders `event` in the given format.
pub fn render(event: &CanonicalEvent, kind: FormatKind) -> Bytes {
    kind.wire_format().render(event)
}

/// Splits `input` on `sep` where it is not preceded by an escaping backslash.
///
/// At most `max_parts` pieces are produced; the last one holds the unsplit remainder.
/// Pieces are returned raw (escapes intact) with the byte offset where each starts.
pub(crate) fn split_unescaped(input: &str, sep: char, max_parts: usize) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in input.char_indices() {
        if parts.len() + 1 == max_parts {
            break;
        }
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            parts.push((start, &input[start..idx]));
            start = idx + ch.len_utf8();
        }
    }
    parts.push((start, &input[start..]));
    parts
}

/// Undoes backslash escaping: `\n` and `\r` become control characters,
/// `\t` a tab, and any other escaped character stands for itself.
pub(crate) fn unescape(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_owned();
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Escapes backslash, line breaks, and each char in `special` (a tab becomes `\t`).
pub(crate) fn escape(input: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' if special.contains(&'\t') => out.push_str("\\t"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Replaces characters outside `allowed` with `_`.
pub(crate) fn sanitize_key(key: &str, allowed: impl Fn(char) -> bool) -> String {
    key.chars()
        .map(|c| if allowed(c) { c } else { '_' })
        .collect()
}

/// Decodes text, reporting the first invalid byte.
pub(crate) fn utf8<'a>(format: &str, raw: &'a [u8]) -> Result<&'a str, FormatError> {
    std::str::from_utf8(raw)
        .map_err(|e| FormatError::malformed(format, e.valid_up_to(), "invalid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_kind_parses_case_insensitively() {
        assert_eq!("CEF".parse::<FormatKind>().unwrap(), FormatKind::Cef);
        assert_eq!("rfc5424".parse::<FormatKind>().unwrap(), FormatKind::Syslog);
        let err = "xml".parse::<FormatKind>().unwrap_err();
        assert_eq!(err, FormatError::UnsupportedFormat("xml".to_owned()));
    }

    #[test]
    fn wire_format_names_match_kinds() {
        for kind in FormatKind::ALL {
            assert_eq!(kind.wire_format().format_name(), kind.as_str());
        }
    }

    #[test]
    fn split_respects_escapes_and_limit() {
        let parts = split_unescaped(r"a|b\|c|d|e", '|', 3);
        let texts: Vec<&str> = parts.iter().map(|(_, s)| *s).collect();
        assert_eq!(texts, vec!["a", r"b\|c", "d|e"]);
        assert_eq!(parts[2].0, 7);
    }

    #[test]
    fn escape_then_unescape_restores_text() {
        let original = "line one\nline|two \\ end=x";
        let escaped = escape(original, &['|', '=']);
        assert!(!escaped.contains('\n'));
        assert_eq!(unescape(&escaped), original);
    }

    #[test]
    fn utf8_reports_offset() {
        let err = utf8("cef", b"CEF:\xff").unwrap_err();
        assert_eq!(err, FormatError::malformed("cef", 4, "invalid UTF-8"));
    }
}
