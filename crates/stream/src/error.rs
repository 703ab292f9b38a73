//! Stream manager error types
//!
//! [`StreamError`] is what callers of the stream manager see; [`DeliveryError`] is
//! what a [`Connector`](crate::connector::Connector) reports and drives the retry
//! and circuit-breaker logic. Neither ever panics a destination task.

use ironstream_core::error::IronstreamError;

/// Stream manager error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Destination buffer is full; the event was not accepted
    #[error("backpressure on destination '{destination}': {reason}")]
    Backpressure { destination: String, reason: String },

    /// No destination with this id is registered
    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    /// A destination with this id is already registered
    #[error("destination already registered: {0}")]
    AlreadyRegistered(String),

    /// Destination settings could not be built
    #[error("invalid destination '{destination}': {reason}")]
    InvalidConfig { destination: String, reason: String },

    /// The destination task has stopped
    #[error("destination '{0}' is not running")]
    Closed(String),
}

impl StreamError {
    pub(crate) fn backpressure(destination: &str, reason: impl Into<String>) -> Self {
        Self::Backpressure {
            destination: destination.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(destination: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            destination: destination.to_owned(),
            reason: reason.into(),
        }
    }

    /// `true` for transient capacity rejections.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Backpressure { .. })
    }
}

impl From<StreamError> for IronstreamError {
    fn from(err: StreamError) -> Self {
        IronstreamError::Stream(err.to_string())
    }
}

/// Connector delivery failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Could not reach the endpoint
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Write or flush failed after connecting
    #[error("i/o error on {endpoint}: {reason}")]
    Io { endpoint: String, reason: String },

    /// The connector call exceeded the delivery timeout
    #[error("delivery timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The endpoint refused the batch
    #[error("rejected by destination: {0}")]
    Rejected(String),
}

impl DeliveryError {
    pub(crate) fn io(endpoint: &str, err: &std::io::Error) -> Self {
        Self::Io {
            endpoint: endpoint.to_owned(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn connect(endpoint: &str, err: &std::io::Error) -> Self {
        Self::Connect {
            endpoint: endpoint.to_owned(),
            reason: err.to_string(),
        }
    }
}
