//! Per-destination include/exclude rules.
//!
//! Rules are checked in order and the first one whose condition matches decides:
//! `include` admits, `exclude` rejects. When no rule matches, the event is admitted
//! unless the chain contains at least one `include` rule (an allow-list).
//!
//! Fields are resolved with [`CanonicalEvent::field`], so canonical names
//! (`severity`, `user_id`, ...) and metadata keys (`source_ip`, `metadata.port`) both work.
//! An absent field never matches.

use ironstream_core::config::FilterConfig;
use ironstream_core::event::CanonicalEvent;
use regex::Regex;

use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Eq(String),
    Ne(String),
    /// Inclusive numeric bounds; a non-numeric value does not match.
    Range { min: Option<f64>, max: Option<f64> },
    Regex(Regex),
}

impl Condition {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Eq(expected) => value == expected,
            Self::Ne(expected) => value != expected,
            Self::Range { min, max } => match value.trim().parse::<f64>() {
                Ok(n) => min.is_none_or(|m| n >= m) && max.is_none_or(|m| n <= m),
                Err(_) => false,
            },
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// One filter rule
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub action: FilterAction,
    pub field: String,
    pub condition: Condition,
}

impl FilterRule {
    pub fn include(field: impl Into<String>, condition: Condition) -> Self {
        Self {
            action: FilterAction::Include,
            field: field.into(),
            condition,
        }
    }

    pub fn exclude(field: impl Into<String>, condition: Condition) -> Self {
        Self {
            action: FilterAction::Exclude,
            field: field.into(),
            condition,
        }
    }

    /// Builds a rule from config, compiling regexes.
    pub fn from_config(destination: &str, config: &FilterConfig) -> Result<Self, StreamError> {
        let action = match config.action.as_str() {
            "include" => FilterAction::Include,
            "exclude" => FilterAction::Exclude,
            other => {
                return Err(StreamError::invalid(
                    destination,
                    format!("unknown filter action '{other}'"),
                ));
            }
        };
        let operand = || {
            config.value.clone().ok_or_else(|| {
                StreamError::invalid(destination, format!("filter op '{}' needs a value", config.op))
            })
        };
        let condition = match config.op.as_str() {
            "eq" => Condition::Eq(operand()?),
            "ne" => Condition::Ne(operand()?),
            "range" => Condition::Range {
                min: config.min,
                max: config.max,
            },
            "regex" => {
                let pattern = operand()?;
                let re = Regex::new(&pattern).map_err(|e| {
                    StreamError::invalid(destination, format!("filter regex '{pattern}': {e}"))
                })?;
                Condition::Regex(re)
            }
            other => {
                return Err(StreamError::invalid(
                    destination,
                    format!("unknown filter op '{other}'"),
                ));
            }
        };
        Ok(Self {
            action,
            field: config.field.clone(),
            condition,
        })
    }

    fn matches(&self, event: &CanonicalEvent) -> bool {
        event
            .field(&self.field)
            .is_some_and(|value| self.condition.matches(&value))
    }
}

/// Ordered rule list
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<FilterRule>,
    has_include: bool,
}

impl FilterChain {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        let has_include = rules.iter().any(|r| r.action == FilterAction::Include);
        Self { rules, has_include }
    }

    pub fn from_config(destination: &str, configs: &[FilterConfig]) -> Result<Self, StreamError> {
        let rules = configs
            .iter()
            .map(|c| FilterRule::from_config(destination, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// `true` when the event may be buffered.
    pub fn admits(&self, event: &CanonicalEvent) -> bool {
        match self.rules.iter().find(|rule| rule.matches(event)) {
            Some(rule) => rule.action == FilterAction::Include,
            None => !self.has_include,
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
