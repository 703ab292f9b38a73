//! Per-destination counters and health snapshot
//!
//! [`DestinationStats`] is shared between the enqueue path and the destination task.
//! Each `record_*` call bumps the local atomic and the matching `metrics` series
//! labelled by destination, so the health snapshot and the Prometheus view agree.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use ironstream_core::metrics as m;
use ironstream_core::pipeline::HealthStatus;
use serde::Serialize;

use crate::circuit::CircuitKind;

/// Deliveries kept for the rolling latency mean.
pub const LATENCY_WINDOW: usize = 64;

#[derive(Debug)]
pub struct DestinationStats {
    label: String,
    enqueued: AtomicU64,
    sent: AtomicU64,
    batches_sent: AtomicU64,
    failed_attempts: AtomicU64,
    dead_lettered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    filtered: AtomicU64,
    sampled_out: AtomicU64,
    disabled: AtomicU64,
    circuit: AtomicU8,
    dead_letter_size: AtomicUsize,
    latencies: Mutex<VecDeque<Duration>>,
}

impl DestinationStats {
    pub fn new(destination_id: &str) -> Self {
        Self {
            label: destination_id.to_owned(),
            enqueued: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            sampled_out: AtomicU64::new(0),
            disabled: AtomicU64::new(0),
            circuit: AtomicU8::new(0),
            dead_letter_size: AtomicUsize::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_ENQUEUED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
    }

    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_FILTERED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
    }

    pub fn record_sampled_out(&self) {
        self.sampled_out.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_SAMPLED_OUT_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_REJECTED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
    }

    pub fn record_disabled(&self) {
        self.disabled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_DISABLED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
    }

    pub fn record_delivered(&self, events: usize, latency: Duration) {
        self.sent.fetch_add(events as u64, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_SENT_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(events as u64);
        metrics::counter!(m::STREAM_BATCHES_SENT_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(1);
        metrics::histogram!(m::STREAM_DELIVERY_DURATION_SECONDS, m::LABEL_DESTINATION => self.label.clone())
            .record(latency.as_secs_f64());

        let mut window = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency);
    }

    pub fn record_failed_attempt(&self, events: usize) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_FAILED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(events as u64);
    }

    pub fn record_dead_lettered(&self, events: usize) {
        self.dead_lettered.fetch_add(events as u64, Ordering::Relaxed);
        metrics::counter!(m::STREAM_EVENTS_DEAD_LETTERED_TOTAL, m::LABEL_DESTINATION => self.label.clone())
            .increment(events as u64);
    }

    pub fn record_dropped(&self, events: usize, reason: &'static str) {
        self.dropped.fetch_add(events as u64, Ordering::Relaxed);
        metrics::counter!(
            m::STREAM_EVENTS_DROPPED_TOTAL,
            m::LABEL_DESTINATION => self.label.clone(),
            m::LABEL_REASON => reason
        )
        .increment(events as u64);
    }

    pub fn set_circuit(&self, kind: CircuitKind) {
        let raw = match kind {
            CircuitKind::Closed => 0,
            CircuitKind::Open => 1,
            CircuitKind::HalfOpen => 2,
        };
        if self.circuit.swap(raw, Ordering::Relaxed) != raw {
            metrics::gauge!(m::STREAM_CIRCUIT_STATE, m::LABEL_DESTINATION => self.label.clone())
                .set(kind.gauge_value());
        }
    }

    pub fn circuit(&self) -> CircuitKind {
        match self.circuit.load(Ordering::Relaxed) {
            1 => CircuitKind::Open,
            2 => CircuitKind::HalfOpen,
            _ => CircuitKind::Closed,
        }
    }

    pub fn set_dead_letter_size(&self, size: usize) {
        self.dead_letter_size.store(size, Ordering::Relaxed);
        metrics::gauge!(m::STREAM_DEAD_LETTER_SIZE, m::LABEL_DESTINATION => self.label.clone())
            .set(size as f64);
    }

    pub fn set_buffered(&self, events: usize) {
        metrics::gauge!(m::STREAM_BUFFERED_EVENTS, m::LABEL_DESTINATION => self.label.clone())
            .set(events as f64);
    }

    pub fn dead_letter_size(&self) -> usize {
        self.dead_letter_size.load(Ordering::Relaxed)
    }

    /// Mean of the last [`LATENCY_WINDOW`] deliveries.
    pub fn mean_latency(&self) -> Option<Duration> {
        let window = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.is_empty() {
            return None;
        }
        let total: Duration = window.iter().sum();
        Some(total / window.len() as u32)
    }

    pub fn counters(&self) -> DestinationCounters {
        DestinationCounters {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            sampled_out: self.sampled_out.load(Ordering::Relaxed),
            disabled: self.disabled.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DestinationCounters {
    pub enqueued: u64,
    pub sent: u64,
    pub batches_sent: u64,
    pub failed_attempts: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub filtered: u64,
    pub sampled_out: u64,
    pub disabled: u64,
}

/// Health snapshot of one destination
#[derive(Debug, Clone, Serialize)]
pub struct DestinationHealth {
    pub id: String,
    pub name: String,
    pub protocol: String,
    pub format: String,
    pub enabled: bool,
    pub priority: u8,
    pub status: HealthStatus,
    pub circuit: CircuitKind,
    pub connector: HealthStatus,
    pub buffered_events: usize,
    pub buffered_bytes: usize,
    pub dead_letter_size: usize,
    pub mean_latency_ms: Option<f64>,
    pub counters: DestinationCounters,
}

/// Derives overall status: an open circuit is unhealthy; half-open, a non-empty
/// dead-letter store or a degraded connector is degraded.
pub fn derive_status(
    circuit: CircuitKind,
    dead_letter_size: usize,
    connector: &HealthStatus,
) -> HealthStatus {
    let own = match circuit {
        CircuitKind::Open => HealthStatus::Unhealthy("circuit open".to_owned()),
        CircuitKind::HalfOpen => HealthStatus::Degraded("circuit half-open".to_owned()),
        CircuitKind::Closed if dead_letter_size > 0 => {
            HealthStatus::Degraded(format!("{dead_letter_size} dead-lettered batches"))
        }
        CircuitKind::Closed => HealthStatus::Healthy,
    };
    own.worst(connector.clone())
}
