//! Connectors -- transport adapters that deliver encoded batches.
//!
//! - [`TcpSyslogConnector`]: TCP with newline or octet-counting framing, reconnects
//!   after any failure
//! - [`UdpSyslogConnector`]: one datagram per record
//! - [`FileConnector`]: appends newline-delimited records to a file
//! - [`MockConnector`]: scripted in-memory connector for tests and dry runs
//!
//! A connector is called by exactly one destination task, one batch at a time. The
//! task wraps every call in a timeout, so `send` does not need its own.

pub mod file;
pub mod mock;
pub mod tcp;
pub mod udp;

pub use file::FileConnector;
pub use mock::MockConnector;
pub use tcp::TcpSyslogConnector;
pub use udp::UdpSyslogConnector;

use std::future::Future;
use std::sync::Mutex;

use ironstream_core::pipeline::HealthStatus;

use crate::batch::EncodedBatch;
use crate::error::DeliveryError;

/// Delivers encoded batches to one external endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Short transport name used in logs.
    fn name(&self) -> &str;

    /// Delivers every record of `batch`, or fails as a whole.
    fn send(&self, batch: &EncodedBatch)
    -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Transport-level health, independent of the circuit breaker.
    fn health(&self) -> HealthStatus;
}

/// Last-outcome tracker shared by the built-in connectors
#[derive(Debug, Default)]
pub(crate) struct LastOutcome {
    last_error: Mutex<Option<String>>,
}

impl LastOutcome {
    pub(crate) fn record<T>(&self, result: &Result<T, DeliveryError>) {
        let mut guard = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = result.as_ref().err().map(ToString::to_string);
    }

    pub(crate) fn health(&self) -> HealthStatus {
        let guard = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_deref() {
            None => HealthStatus::Healthy,
            Some(err) => HealthStatus::Degraded(format!("last delivery failed: {err}")),
        }
    }
}
