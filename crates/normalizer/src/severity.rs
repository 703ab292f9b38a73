//! Severity scales used by the wire formats.
//!
//! CEF / LEEF / ECS carry a 0-10 number, syslog carries the RFC 5424 0-7 code.
//! Rendering picks one fixed value per severity, so render → parse is lossless.

use ironstream_core::types::Severity;

/// Severity → 0-10 scale (CEF `Severity`, LEEF `sev`, ECS `event.severity`).
pub fn to_scale(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 3,
        Severity::Medium => 5,
        Severity::High => 8,
        Severity::Critical => 10,
    }
}

/// 0-10 scale → severity. Values above 10 are treated as critical.
pub fn from_scale(value: u64) -> Severity {
    match value {
        0..=3 => Severity::Low,
        4..=6 => Severity::Medium,
        7..=8 => Severity::High,
        _ => Severity::Critical,
    }
}

/// Severity → RFC 5424 severity code.
pub fn to_syslog(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 2,
        Severity::High => 3,
        Severity::Medium => 4,
        Severity::Low => 5,
    }
}

/// RFC 5424 severity code → severity.
///
/// 0 emergency, 1 alert and 2 critical map to critical; 6 info and 7 debug map to low.
pub fn from_syslog(code: u8) -> Severity {
    match code {
        0..=2 => Severity::Critical,
        3 => Severity::High,
        4 => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Parses a severity written as a name (`high`, `warning`, ...) or a 0-10 number.
///
/// CEF's `Very-High` is accepted as critical.
pub fn parse(text: &str) -> Option<Severity> {
    let text = text.trim();
    if let Some(sev) = Severity::from_str_loose(text) {
        return Some(sev);
    }
    if text.eq_ignore_ascii_case("very-high") {
        return Some(Severity::Critical);
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(from_scale(n));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| from_scale(f.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_is_lossless_for_rendered_values() {
        for sev in Severity::ALL {
            assert_eq!(from_scale(u64::from(to_scale(sev))), sev);
            assert_eq!(from_syslog(to_syslog(sev)), sev);
        }
    }

    #[test]
    fn syslog_extremes() {
        assert_eq!(from_syslog(0), Severity::Critical);
        assert_eq!(from_syslog(6), Severity::Low);
        assert_eq!(from_syslog(7), Severity::Low);
    }

    #[test]
    fn parse_accepts_names_and_numbers() {
        assert_eq!(parse("HIGH"), Some(Severity::High));
        assert_eq!(parse("Very-High"), Some(Severity::Critical));
        assert_eq!(parse("9"), Some(Severity::Critical));
        assert_eq!(parse("2"), Some(Severity::Low));
        assert_eq!(parse("5.0"), Some(Severity::Medium));
        assert_eq!(parse("unknown"), None);
        assert_eq!(parse("-3"), None);
    }
}
