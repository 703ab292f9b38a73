//! Ironstream correlation engine -- stateful detection rules over the live event stream.
//!
//! ```text
//! events ─▶ [bounded queue] ─▶ engine task ─┬─ rule: relevance ─▶ techniques ─▶ combine ─▶ cooldown
//!                                           ├─ rule: ...
//!                                           └─ attack chains (over rule alerts)
//!                                                        │
//!                                                        ▼
//!                                                    AlertSink
//! ```
//!
//! - [`rule`]: YAML rule format, validation, compiled matchers, loader
//! - [`technique`]: temporal, entity and statistical state
//! - [`engine`]: registry, evaluation, cooldown/dedup, snapshots
//! - [`chain`]: attack chains built from rule alerts
//! - [`sink`]: [`AlertSink`] and the built-in sinks
//! - [`service`]: the engine task and its [`Pipeline`](ironstream_core::Pipeline) lifecycle

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod rule;
pub mod service;
pub mod sink;
pub mod technique;

pub use chain::{ChainSnapshot, ChainSpec, ChainTracker};
pub use config::CorrelationSettings;
pub use engine::{CorrelationEngine, RuleCounters, RuleSnapshot};
pub use error::{CorrelationError, RuleEvaluationError};
pub use rule::{CombinePolicy, CorrelationRule, RuleLoader};
pub use service::{CorrelationHandle, CorrelationService, EventPermit};
pub use sink::{AlertSink, ChannelAlertSink, FanoutAlertSink, TracingAlertSink};
pub use technique::Technique;
