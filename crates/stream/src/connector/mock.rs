//! In-memory connector with scripted failures.
//!
//! Clones share state, so a test can keep one clone while the destination task owns
//! another and then inspect what was delivered and when.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ironstream_core::pipeline::HealthStatus;
use tokio::time::Instant;

use super::Connector;
use crate::batch::EncodedBatch;
use crate::error::DeliveryError;

#[derive(Debug, Default)]
struct MockState {
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    attempts: AtomicU64,
    delay_ms: AtomicU64,
    received: Mutex<Vec<EncodedBatch>>,
    attempt_times: Mutex<Vec<Instant>>,
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fails every send until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.state.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Sleeps this long inside every send.
    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Send calls so far, successful or not.
    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.state.attempt_times).clone()
    }

    /// Successfully delivered batches, in delivery order.
    pub fn received(&self) -> Vec<EncodedBatch> {
        lock(&self.state.received).clone()
    }

    pub fn received_records(&self) -> usize {
        lock(&self.state.received).iter().map(EncodedBatch::len).sum()
    }

    fn should_fail(&self) -> bool {
        if self.state.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, batch: &EncodedBatch) -> Result<(), DeliveryError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.attempt_times).push(Instant::now());

        let delay = self.state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.should_fail() {
            return Err(DeliveryError::Rejected("scripted failure".to_owned()));
        }
        lock(&self.state.received).push(batch.clone());
        Ok(())
    }

    fn health(&self) -> HealthStatus {
        if self.state.always_fail.load(Ordering::SeqCst) {
            HealthStatus::Degraded("scripted failures".to_owned())
        } else {
            HealthStatus::Healthy
        }
    }
}
