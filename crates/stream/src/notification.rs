//! Delivery-failed and dropped notifications
//!
//! Sent on a bounded channel shared by all destinations. Sending never blocks a
//! destination task: a full channel loses the notification with a warning, while the
//! counters in the health snapshot still record the event.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// Why events were permanently dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Evicted from a full dead-letter store
    DeadLetterOverflow,
    /// Dead-letter retries exhausted
    RetriesExhausted,
    /// Still undelivered when the stream manager stopped
    Shutdown,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeadLetterOverflow => "dead_letter_overflow",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamNotification {
    /// A batch exhausted its retries and moved to the dead-letter store
    DeliveryFailed {
        destination_id: String,
        sequence: u64,
        events: usize,
        attempts: u32,
        error: String,
    },
    /// A batch left the dead-letter store without being delivered
    Dropped {
        destination_id: String,
        sequence: u64,
        events: usize,
        reason: DropReason,
    },
}

impl StreamNotification {
    pub fn destination_id(&self) -> &str {
        match self {
            Self::DeliveryFailed { destination_id, .. } | Self::Dropped { destination_id, .. } => {
                destination_id
            }
        }
    }
}

/// Non-blocking sender side
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<StreamNotification>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<StreamNotification>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, notification: StreamNotification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    destination = n.destination_id(),
                    "notification channel full, notification lost"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("notification receiver dropped");
            }
        }
    }
}
