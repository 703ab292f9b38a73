//! Ironstream daemon library.
//!
//! Exposes the orchestration pieces for integration tests and embedding; the
//! `ironstream-daemon` binary is a thin wrapper around [`Orchestrator`].

pub mod cli;
pub mod handle;
pub mod health;
pub mod ingest;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod submission;

pub use handle::IronstreamHandle;
pub use health::{ComponentHealth, DaemonHealth};
pub use orchestrator::{Orchestrator, ValidationSummary, validate_config};
pub use submission::{RejectReason, SubmitOutcome};
