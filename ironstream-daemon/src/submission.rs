//! Result of one submission.

use std::fmt;

use serde::Serialize;

use ironstream_core::error::FormatError;

/// Why a submission was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// Not parseable in any supported format, or over the size limit
    Malformed(String),
    /// Parsed, but timestamp, source or message is absent
    MissingField(String),
    /// No buffer had room; retry later
    Backpressure(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::Backpressure(_) => "backpressure",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backpressure(_))
    }
}

impl From<&FormatError> for RejectReason {
    fn from(err: &FormatError) -> Self {
        match err {
            FormatError::MissingField(field) => Self::MissingField(field.clone()),
            other => Self::Malformed(other.to_string()),
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "malformed payload: {detail}"),
            Self::MissingField(field) => write!(f, "missing required field '{field}'"),
            Self::Backpressure(detail) => write!(f, "buffer capacity exceeded: {detail}"),
        }
    }
}

/// `Accepted` or `Rejected(reason)`
///
/// Acceptance means the event was normalized and admitted; delivery and rule
/// evaluation happen afterwards and never turn an accepted submission into a
/// rejected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted {
        event_id: String,
        /// Destinations that buffered the event
        destinations: usize,
    },
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(reason) => Some(reason),
        }
    }
}
