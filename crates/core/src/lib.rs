//! Ironstream core -- types shared by every crate in the workspace.
//!
//! - [`event`]: the immutable [`CanonicalEvent`] and its builder
//! - [`types`]: [`Severity`], [`Alert`], [`EventRef`]
//! - [`error`]: top-level [`IronstreamError`] plus the shared [`FormatError`]
//! - [`config`]: `ironstream.toml` parsing, env overrides, validation
//! - [`metrics`]: metric names and descriptions
//! - [`pipeline`]: the [`Pipeline`] lifecycle trait and [`HealthStatus`]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

pub use config::IronstreamConfig;
pub use error::{ConfigError, FormatError, IronstreamError, PipelineError};
pub use event::{ActorIds, CanonicalEvent, CanonicalEventBuilder};
pub use pipeline::{HealthStatus, Pipeline};
pub use types::{Alert, EventRef, Severity};
