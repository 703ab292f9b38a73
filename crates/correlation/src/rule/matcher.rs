//! Field conditions and message patterns, compiled once per rule.

use regex::{Regex, RegexBuilder};

use ironstream_core::event::CanonicalEvent;

use super::types::{ConditionModifier, CorrelationRule, FieldCondition, PatternMode, PatternSpec};
use crate::error::CorrelationError;

/// Compiled field condition
#[derive(Debug, Clone)]
struct CompiledCondition {
    field: String,
    test: ValueTest,
}

#[derive(Debug, Clone)]
enum ValueTest {
    Exact(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl ValueTest {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(v) => value == v,
            Self::Contains(v) => value.contains(v.as_str()),
            Self::StartsWith(v) => value.starts_with(v.as_str()),
            Self::EndsWith(v) => value.ends_with(v.as_str()),
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// Relevance filter of one rule: event types plus AND-combined field conditions.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    event_types: Vec<String>,
    conditions: Vec<CompiledCondition>,
}

impl RuleMatcher {
    /// Compiles the rule's conditions, rejecting invalid regexes.
    pub fn compile(rule: &CorrelationRule) -> Result<Self, CorrelationError> {
        let conditions = rule
            .conditions
            .iter()
            .enumerate()
            .map(|(idx, c)| compile_condition(&rule.id, idx, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            event_types: rule.event_types.clone(),
            conditions,
        })
    }

    /// `true` when the event type is listed (or none are) and every condition matches.
    ///
    /// A missing field fails its condition.
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if !self.event_types.is_empty()
            && !self.event_types.iter().any(|t| t == event.event_type())
        {
            return false;
        }
        self.conditions.iter().all(|c| {
            event
                .field(&c.field)
                .is_some_and(|value| c.test.matches(&value))
        })
    }
}

fn compile_condition(
    rule_id: &str,
    idx: usize,
    condition: &FieldCondition,
) -> Result<CompiledCondition, CorrelationError> {
    let test = match condition.modifier {
        ConditionModifier::Exact => ValueTest::Exact(condition.value.clone()),
        ConditionModifier::Contains => ValueTest::Contains(condition.value.clone()),
        ConditionModifier::StartsWith => ValueTest::StartsWith(condition.value.clone()),
        ConditionModifier::EndsWith => ValueTest::EndsWith(condition.value.clone()),
        ConditionModifier::Regex => {
            let re = Regex::new(&condition.value).map_err(|e| {
                CorrelationError::validation(
                    rule_id,
                    format!(
                        "invalid regex in conditions[{idx}] for field '{}': {e}",
                        condition.field
                    ),
                )
            })?;
            ValueTest::Regex(re)
        }
    };
    Ok(CompiledCondition {
        field: condition.field.clone(),
        test,
    })
}

/// Compiled pattern technique
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    mode: PatternMode,
    fields: Vec<String>,
    tests: Vec<ValueTest>,
}

impl PatternMatcher {
    pub fn compile(rule_id: &str, spec: &PatternSpec) -> Result<Self, CorrelationError> {
        let mut tests = Vec::with_capacity(spec.patterns.len());
        for (idx, entry) in spec.patterns.iter().enumerate() {
            let pattern = match (&entry.contains, &entry.regex) {
                (Some(needle), None) => regex::escape(needle),
                (None, Some(pattern)) => pattern.clone(),
                _ => {
                    return Err(CorrelationError::validation(
                        rule_id,
                        format!("pattern.patterns[{idx}] needs exactly one of contains/regex"),
                    ));
                }
            };
            // plain substrings stay plain unless case folding needs the regex engine
            let test = match (&entry.contains, spec.case_insensitive) {
                (Some(needle), false) => ValueTest::Contains(needle.clone()),
                _ => ValueTest::Regex(
                    RegexBuilder::new(&pattern)
                        .case_insensitive(spec.case_insensitive)
                        .build()
                        .map_err(|e| {
                            CorrelationError::validation(
                                rule_id,
                                format!("invalid regex in pattern.patterns[{idx}]: {e}"),
                            )
                        })?,
                ),
            };
            tests.push(test);
        }
        Ok(Self {
            mode: spec.mode,
            fields: spec.fields.clone(),
            tests,
        })
    }

    /// Evaluates the patterns against the configured fields.
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        let values: Vec<_> = self.fields.iter().filter_map(|f| event.field(f)).collect();
        let hit = |test: &ValueTest| values.iter().any(|v| test.matches(v));
        match self.mode {
            PatternMode::Any => self.tests.iter().any(hit),
            PatternMode::All => self.tests.iter().all(hit),
        }
    }
}
