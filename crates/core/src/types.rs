//! Domain types shared by the stream manager, the correlation engine, and alert sinks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event / alert severity
///
/// `Ord` follows escalation order (`Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational or low-impact
    Low,
    /// Default when the raw event carries no severity
    #[default]
    Medium,
    /// Needs attention
    High,
    /// Immediate response required
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Parses a severity name, case-insensitively.
    ///
    /// Common log-level aliases are accepted (`warn` → medium, `err` → high, ...).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" | "info" | "informational" | "notice" | "debug" => Some(Self::Low),
            "medium" | "med" | "moderate" | "warn" | "warning" => Some(Self::Medium),
            "high" | "error" | "err" => Some(Self::High),
            "critical" | "crit" | "fatal" | "alert" | "emergency" | "emerg" => {
                Some(Self::Critical)
            }
            _ => None,
        }
    }

    /// Lowercase name, stable across releases (used on the wire and in metric labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// One level higher, saturating at `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an event that contributed to an alert.
///
/// Alerts keep these small snapshots instead of the events themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// Canonical event id
    pub event_id: String,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: String,
}

/// Security alert produced by the correlation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id (UUID v4)
    pub id: String,
    /// Id of the rule (or attack chain) that fired
    pub rule_id: String,
    /// Human-readable rule name
    pub rule_name: String,
    /// Severity
    pub severity: Severity,
    /// Event time of the triggering event
    pub timestamp: DateTime<Utc>,
    /// Triggering events, oldest first, bounded
    pub events: Vec<EventRef>,
    /// Generated description
    pub message: String,
    /// Rendered dedup key
    pub dedup_key: String,
    /// MITRE ATT&CK technique id (e.g. `T1110`)
    pub mitre_technique: Option<String>,
    /// Static recommended actions copied from the rule
    pub recommended_actions: Vec<String>,
    /// `true` for attack-chain alerts built from other alerts
    pub composite: bool,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (rule: {}, key: {})",
            self.severity, self.rule_name, self.rule_id, self.dedup_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_default_is_medium() {
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn severity_from_str_loose() {
        assert_eq!(Severity::from_str_loose("LOW"), Some(Severity::Low));
        assert_eq!(Severity::from_str_loose("warning"), Some(Severity::Medium));
        assert_eq!(Severity::from_str_loose(" err "), Some(Severity::High));
        assert_eq!(Severity::from_str_loose("crit"), Some(Severity::Critical));
        assert_eq!(Severity::from_str_loose("bogus"), None);
    }

    #[test]
    fn severity_escalate_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }

    #[test]
    fn severity_serde_is_lowercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn alert_display_includes_rule_and_key() {
        let alert = Alert {
            id: "a-1".to_owned(),
            rule_id: "brute_force".to_owned(),
            rule_name: "Brute force".to_owned(),
            severity: Severity::High,
            timestamp: Utc::now(),
            events: vec![],
            message: "5 failures".to_owned(),
            dedup_key: "alice".to_owned(),
            mitre_technique: Some("T1110".to_owned()),
            recommended_actions: vec![],
            composite: false,
        };
        let text = alert.to_string();
        assert!(text.contains("high"));
        assert!(text.contains("brute_force"));
        assert!(text.contains("alice"));
    }
}
