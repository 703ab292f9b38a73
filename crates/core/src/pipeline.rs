//! Lifecycle trait implemented by the long-running components.

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::error::IronstreamError;

/// Component health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Working, but something needs attention
    Degraded(String),
    /// Not processing
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }

    /// Combines two statuses, keeping the worst.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        fn rank(s: &HealthStatus) -> u8 {
            match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded(_) => 1,
                HealthStatus::Unhealthy(_) => 2,
            }
        }
        if rank(&other) > rank(&self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Start / stop / health lifecycle.
///
/// `start` spawns the component's tasks; `stop` drains them.
pub trait Pipeline: Send {
    fn start(&mut self) -> impl Future<Output = Result<(), IronstreamError>> + Send;

    fn stop(&mut self) -> impl Future<Output = Result<(), IronstreamError>> + Send;

    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
