//! Correlation rule data types
//!
//! One YAML rule file deserializes into one [`CorrelationRule`].

use ironstream_core::types::Severity;
use serde::{Deserialize, Serialize};

use crate::error::CorrelationError;

/// Longest accepted rule id.
pub const MAX_RULE_ID_LEN: usize = 256;

/// Correlation rule
///
/// # YAML schema
/// ```yaml
/// id: ssh_brute_force
/// name: SSH brute force
/// severity: high
/// event_types: [auth_failure]
/// conditions:
///   - field: source
///     value: sshd
/// temporal:
///   window_secs: 300
///   threshold: 5
/// entity:
///   key: user_id
///   window_secs: 300
///   threshold: 5
/// cooldown_secs: 60
/// dedup_key: "{user_id}"
/// mitre_technique: T1110
/// recommended_actions:
///   - Lock the account
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Unique rule id
    pub id: String,
    /// Name shown on alerts
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Event types this rule looks at (empty = all)
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Field conditions, AND-combined
    #[serde(default)]
    pub conditions: Vec<FieldCondition>,
    #[serde(default)]
    pub temporal: Option<TemporalSpec>,
    #[serde(default)]
    pub entity: Option<EntitySpec>,
    #[serde(default)]
    pub pattern: Option<PatternSpec>,
    #[serde(default)]
    pub statistical: Option<StatisticalSpec>,
    /// How technique results combine
    #[serde(default)]
    pub combine: CombinePolicy,
    /// Score needed under [`CombinePolicy::Weighted`]
    #[serde(default)]
    pub min_score: Option<f64>,
    /// Minimum event-time gap between two alerts with the same dedup key
    #[serde(default)]
    pub cooldown_secs: u64,
    /// Dedup key template with `{field}` placeholders (empty = rule id)
    #[serde(default)]
    pub dedup_key: String,
    #[serde(default)]
    pub mitre_technique: Option<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl CorrelationRule {
    /// Minimal enabled rule with no techniques; it fires on every relevant event.
    pub fn new(id: impl Into<String>, name: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            severity,
            priority: 0,
            enabled: true,
            event_types: Vec::new(),
            conditions: Vec::new(),
            temporal: None,
            entity: None,
            pattern: None,
            statistical: None,
            combine: CombinePolicy::All,
            min_score: None,
            cooldown_secs: 0,
            dedup_key: String::new(),
            mitre_technique: None,
            recommended_actions: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Number of techniques the rule declares.
    pub fn technique_count(&self) -> usize {
        usize::from(self.temporal.is_some())
            + usize::from(self.entity.is_some())
            + usize::from(self.pattern.is_some())
            + usize::from(self.statistical.is_some())
    }

    /// Structural validation. Regex compilation happens when the rule is compiled.
    pub fn validate(&self) -> Result<(), CorrelationError> {
        let fail = |reason: &str| Err(CorrelationError::validation(&self.id, reason));

        if self.id.trim().is_empty() {
            return fail("rule id must not be empty");
        }
        if self.id.len() > MAX_RULE_ID_LEN {
            return Err(CorrelationError::validation(
                &self.id,
                format!("rule id must not exceed {MAX_RULE_ID_LEN} characters"),
            ));
        }
        if self.name.trim().is_empty() {
            return fail("rule name must not be empty");
        }

        for (idx, condition) in self.conditions.iter().enumerate() {
            if condition.field.trim().is_empty() {
                return Err(CorrelationError::validation(
                    &self.id,
                    format!("conditions[{idx}].field must not be empty"),
                ));
            }
        }

        if let Some(temporal) = &self.temporal {
            if temporal.window_secs == 0 {
                return fail("temporal.window_secs must be greater than 0");
            }
            if temporal.threshold == Some(0) {
                return fail("temporal.threshold must be greater than 0");
            }
            if temporal.threshold.is_none() && temporal.sequence.is_empty() {
                return fail("temporal needs a threshold or a sequence");
            }
            check_weight(&self.id, "temporal", temporal.weight)?;
        }

        if let Some(entity) = &self.entity {
            if entity.key.trim().is_empty() {
                return fail("entity.key must not be empty");
            }
            if entity.window_secs == 0 {
                return fail("entity.window_secs must be greater than 0");
            }
            if entity.threshold == 0 {
                return fail("entity.threshold must be greater than 0");
            }
            check_weight(&self.id, "entity", entity.weight)?;
        }

        if let Some(pattern) = &self.pattern {
            if pattern.patterns.is_empty() {
                return fail("pattern.patterns must not be empty");
            }
            if pattern.fields.iter().any(|f| f.trim().is_empty()) {
                return fail("pattern.fields must not contain empty names");
            }
            for (idx, entry) in pattern.patterns.iter().enumerate() {
                if entry.contains.is_some() == entry.regex.is_some() {
                    return Err(CorrelationError::validation(
                        &self.id,
                        format!("pattern.patterns[{idx}] needs exactly one of contains/regex"),
                    ));
                }
            }
            check_weight(&self.id, "pattern", pattern.weight)?;
        }

        if let Some(stat) = &self.statistical {
            if stat.field.trim().is_empty() {
                return fail("statistical.field must not be empty");
            }
            if stat.window_secs == 0 {
                return fail("statistical.window_secs must be greater than 0");
            }
            if stat.min_samples < 2 {
                return fail("statistical.min_samples must be at least 2");
            }
            if stat.max_samples < stat.min_samples {
                return fail("statistical.max_samples must not be below min_samples");
            }
            if !(stat.deviation_multiplier.is_finite() && stat.deviation_multiplier > 0.0) {
                return fail("statistical.deviation_multiplier must be greater than 0");
            }
            if let Some(p) = stat.rare_percentile {
                if !(p > 0.0 && p < 100.0) {
                    return fail("statistical.rare_percentile must be within (0, 100)");
                }
            }
            check_weight(&self.id, "statistical", stat.weight)?;
        }

        if self.combine == CombinePolicy::Weighted {
            match self.min_score {
                Some(score) if score.is_finite() && score > 0.0 => {}
                _ => return fail("weighted combine needs min_score greater than 0"),
            }
            if self.technique_count() == 0 {
                return fail("weighted combine needs at least one technique");
            }
        }

        Ok(())
    }
}

fn check_weight(rule_id: &str, technique: &str, weight: f64) -> Result<(), CorrelationError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(CorrelationError::validation(
            rule_id,
            format!("{technique}.weight must be a non-negative number"),
        ))
    }
}

/// Field condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCondition {
    /// Event field path (see `CanonicalEvent::field`)
    pub field: String,
    #[serde(default)]
    pub modifier: ConditionModifier,
    pub value: String,
}

impl FieldCondition {
    pub fn exact(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            modifier: ConditionModifier::Exact,
            value: value.into(),
        }
    }
}

/// Condition modifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionModifier {
    #[default]
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// How a rule combines its technique results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinePolicy {
    /// Every declared technique must pass
    #[default]
    All,
    /// At least one technique must pass
    Any,
    /// Sum of passing technique weights must reach `min_score`
    Weighted,
}

/// Sliding-window count / sequence technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalSpec {
    pub window_secs: u64,
    /// Events needed inside the window
    #[serde(default)]
    pub threshold: Option<usize>,
    /// Event types that must appear inside the window
    #[serde(default)]
    pub sequence: Vec<String>,
    /// Sequence must appear in arrival order
    #[serde(default = "default_ordered")]
    pub ordered: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_ordered() -> bool {
    true
}

/// Per-entity velocity technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    /// Field path that identifies the entity (`user_id`, `source_ip`, ...)
    pub key: String,
    pub window_secs: u64,
    /// Fires once the count inside the window exceeds this
    pub threshold: usize,
    /// Count distinct values of this field instead of events
    #[serde(default)]
    pub distinct_field: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Stateless substring / regex technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    #[serde(default)]
    pub mode: PatternMode,
    /// Fields searched (default: message)
    #[serde(default = "default_pattern_fields")]
    pub fields: Vec<String>,
    pub patterns: Vec<PatternEntry>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_pattern_fields() -> Vec<String> {
    vec!["message".to_owned()]
}

/// One pattern: exactly one of `contains` or `regex`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl PatternEntry {
    pub fn contains(s: impl Into<String>) -> Self {
        Self {
            contains: Some(s.into()),
            regex: None,
        }
    }

    pub fn regex(s: impl Into<String>) -> Self {
        Self {
            contains: None,
            regex: Some(s.into()),
        }
    }
}

/// Pattern combination mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Any,
    All,
}

/// Rolling-baseline anomaly technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalSpec {
    /// Numeric field
    pub field: String,
    /// Baseline time window
    pub window_secs: u64,
    /// Baseline sample cap
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Samples needed before anything is flagged
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    pub deviation_multiplier: f64,
    /// Also flag values above this percentile of the baseline
    #[serde(default)]
    pub rare_percentile: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_max_samples() -> usize {
    1_000
}

fn default_min_samples() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temporal(window_secs: u64, threshold: Option<usize>) -> TemporalSpec {
        TemporalSpec {
            window_secs,
            threshold,
            sequence: Vec::new(),
            ordered: true,
            weight: 1.0,
        }
    }

    fn rule() -> CorrelationRule {
        CorrelationRule::new("r1", "Rule one", Severity::High)
    }

    #[test]
    fn minimal_rule_is_valid() {
        assert!(rule().validate().is_ok());
        assert_eq!(rule().technique_count(), 0);
    }

    #[test]
    fn empty_and_long_ids_rejected() {
        let mut r = rule();
        r.id = String::new();
        assert!(r.validate().is_err());
        r.id = "x".repeat(MAX_RULE_ID_LEN + 1);
        assert!(r.validate().is_err());
    }

    #[test]
    fn temporal_needs_window_and_threshold_or_sequence() {
        let mut r = rule();
        r.temporal = Some(temporal(0, Some(5)));
        assert!(r.validate().is_err());
        r.temporal = Some(temporal(60, Some(0)));
        assert!(r.validate().is_err());
        r.temporal = Some(temporal(60, None));
        assert!(r.validate().is_err());
        let mut seq = temporal(60, None);
        seq.sequence = vec!["login".to_owned(), "sudo".to_owned()];
        r.temporal = Some(seq);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn statistical_multiplier_must_be_positive() {
        let mut r = rule();
        r.statistical = Some(StatisticalSpec {
            field: "bytes".to_owned(),
            window_secs: 3600,
            max_samples: 100,
            min_samples: 10,
            deviation_multiplier: 0.0,
            rare_percentile: None,
            weight: 1.0,
        });
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("deviation_multiplier"));
    }

    #[test]
    fn pattern_entry_needs_exactly_one_kind() {
        let mut r = rule();
        r.pattern = Some(PatternSpec {
            mode: PatternMode::Any,
            fields: default_pattern_fields(),
            patterns: vec![PatternEntry {
                contains: Some("a".to_owned()),
                regex: Some("b".to_owned()),
            }],
            case_insensitive: false,
            weight: 1.0,
        });
        assert!(r.validate().is_err());
    }

    #[test]
    fn weighted_needs_min_score() {
        let mut r = rule();
        r.temporal = Some(temporal(60, Some(3)));
        r.combine = CombinePolicy::Weighted;
        assert!(r.validate().is_err());
        r.min_score = Some(1.0);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn yaml_defaults() {
        let yaml = r#"
id: brute
name: Brute force
entity:
  key: user_id
  window_secs: 300
  threshold: 5
"#;
        let r: CorrelationRule = serde_yaml::from_str(yaml).unwrap();
        assert!(r.enabled);
        assert_eq!(r.severity, Severity::Medium);
        assert_eq!(r.combine, CombinePolicy::All);
        let entity = r.entity.unwrap();
        assert_eq!(entity.weight, 1.0);
        assert!(entity.distinct_field.is_none());
    }
}
