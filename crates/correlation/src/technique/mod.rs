//! Detection techniques and their per-rule state.
//!
//! - [`temporal`]: sliding window, count threshold, event-type sequence
//! - [`entity`]: per-entity velocity / distinct counts
//! - [`statistical`]: rolling baseline and deviation scoring
//!
//! The pattern technique is stateless and lives in [`crate::rule::matcher`].

pub mod entity;
pub mod statistical;
pub mod temporal;

pub use entity::{EntityObservation, EntityTracker};
pub use statistical::{Anomaly, Baseline, StatObservation};
pub use temporal::TemporalWindow;

use chrono::Duration;

/// Longest window accepted: 100 years.
const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3_600;

/// Window length as a chrono duration, clamped so date arithmetic cannot overflow.
pub(crate) fn window(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_WINDOW_SECS) as i64)
}

/// Technique identifier used in alert messages, weights and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Technique {
    Temporal,
    Entity,
    Pattern,
    Statistical,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Entity => "entity",
            Self::Pattern => "pattern",
            Self::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
