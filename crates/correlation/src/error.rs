//! Correlation engine error types
//!
//! [`CorrelationError`] covers rule registration, rule loading and the service
//! lifecycle. [`RuleEvaluationError`] is scoped to one rule and one event: the
//! engine logs and counts it, and it never leaves the evaluation step.

use ironstream_core::error::IronstreamError;

/// Correlation engine domain error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// Rule file could not be read or parsed
    #[error("rule load error: {path}: {reason}")]
    RuleLoad { path: String, reason: String },

    /// Rule definition is invalid
    #[error("rule validation error: rule '{rule_id}': {reason}")]
    RuleValidation { rule_id: String, reason: String },

    /// A rule with this id is already registered
    #[error("rule already registered: {0}")]
    DuplicateRule(String),

    /// No rule with this id is registered
    #[error("unknown rule: {0}")]
    UnknownRule(String),

    /// Registering the rule would exceed the rule count limit
    #[error("too many rules: max {max}")]
    TooManyRules { max: usize },

    /// Attack chain definition is invalid
    #[error("invalid chain '{chain_id}': {reason}")]
    InvalidChain { chain_id: String, reason: String },

    /// The engine input queue is full
    #[error("correlation queue full ({capacity} events)")]
    Backpressure { capacity: usize },

    /// The engine task is not running
    #[error("correlation engine is not running")]
    Closed,
}

impl CorrelationError {
    pub(crate) fn validation(rule_id: &str, reason: impl Into<String>) -> Self {
        Self::RuleValidation {
            rule_id: if rule_id.is_empty() {
                "(empty)".to_owned()
            } else {
                rule_id.to_owned()
            },
            reason: reason.into(),
        }
    }

    pub(crate) fn load(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::RuleLoad {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<CorrelationError> for IronstreamError {
    fn from(err: CorrelationError) -> Self {
        IronstreamError::Correlation(err.to_string())
    }
}

/// Failure while evaluating one rule against one event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule '{rule_id}' failed on event {event_id}: {reason}")]
pub struct RuleEvaluationError {
    pub rule_id: String,
    pub event_id: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rule_id_is_shown_as_placeholder() {
        let err = CorrelationError::validation("", "rule id must not be empty");
        assert_eq!(
            err.to_string(),
            "rule validation error: rule '(empty)': rule id must not be empty"
        );
    }

    #[test]
    fn converts_to_ironstream_error() {
        let err: IronstreamError = CorrelationError::UnknownRule("brute".to_owned()).into();
        assert!(matches!(err, IronstreamError::Correlation(ref msg) if msg.contains("brute")));
    }

    #[test]
    fn evaluation_error_display() {
        let err = RuleEvaluationError {
            rule_id: "bytes_spike".to_owned(),
            event_id: "e1".to_owned(),
            reason: "field 'bytes' is not numeric".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "rule 'bytes_spike' failed on event e1: field 'bytes' is not numeric"
        );
    }
}
