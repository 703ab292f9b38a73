//! Correlation rules -- YAML definitions, compiled matchers and dedup templates.
//!
//! # Rule format
//! ```yaml
//! id: exfil_spike
//! name: Outbound transfer spike
//! severity: high
//! event_types: [net_flow]
//! statistical:
//!   field: bytes_out
//!   window_secs: 3600
//!   deviation_multiplier: 3.0
//! entity:
//!   key: source_ip
//!   window_secs: 300
//!   threshold: 10
//!   distinct_field: dst_ip
//! combine: any
//! ```
//!
//! - [`types`]: rule data structures and validation
//! - [`matcher`]: event-type filter, field conditions, pattern technique
//! - [`template`]: dedup key templates
//! - [`loader`]: rule files from a directory

pub mod loader;
pub mod matcher;
pub mod template;
pub mod types;

pub use loader::{LoadLimits, RuleLoader};
pub use matcher::{PatternMatcher, RuleMatcher};
pub use template::DedupTemplate;
pub use types::{
    CombinePolicy, ConditionModifier, CorrelationRule, EntitySpec, FieldCondition, PatternEntry,
    PatternMode, PatternSpec, StatisticalSpec, TemporalSpec,
};
