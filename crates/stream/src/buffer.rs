//! Destination buffering -- open batch plus a shared capacity gauge
//!
//! [`EventBuffer`] collects admitted events into the open batch and seals it when it
//! reaches `batch_size` or when the flush deadline (oldest event + flush interval)
//! passes. It is owned by the destination task only.
//!
//! [`BufferGauge`] is shared between the enqueue side and the task. It counts every
//! event that is buffered or sealed but not yet delivered, so the capacity check at
//! enqueue time sees the whole backlog. Capacity is reserved before the event is sent
//! to the task and released once its batch is delivered or dead-lettered.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ironstream_core::event::CanonicalEvent;
use tokio::time::Instant;

use crate::batch::Batch;

/// Which cap a reservation hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityExceeded {
    Events { max: usize },
    Bytes { max: usize },
}

impl CapacityExceeded {
    pub fn describe(&self) -> String {
        match self {
            Self::Events { max } => format!("buffer full ({max} events)"),
            Self::Bytes { max } => format!("buffer full ({max} bytes)"),
        }
    }
}

/// Event and byte counters for one destination's backlog
#[derive(Debug)]
pub struct BufferGauge {
    events: AtomicUsize,
    bytes: AtomicUsize,
    max_events: usize,
    max_bytes: usize,
}

impl BufferGauge {
    pub fn new(max_events: usize, max_bytes: usize) -> Self {
        Self {
            events: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            max_events,
            max_bytes,
        }
    }

    /// Reserves room for one event of `size` bytes.
    pub fn try_reserve(&self, size: usize) -> Result<(), CapacityExceeded> {
        let prev_events = self.events.fetch_add(1, Ordering::AcqRel);
        if prev_events >= self.max_events {
            self.events.fetch_sub(1, Ordering::AcqRel);
            return Err(CapacityExceeded::Events {
                max: self.max_events,
            });
        }
        let prev_bytes = self.bytes.fetch_add(size, Ordering::AcqRel);
        if prev_bytes.saturating_add(size) > self.max_bytes {
            self.bytes.fetch_sub(size, Ordering::AcqRel);
            self.events.fetch_sub(1, Ordering::AcqRel);
            return Err(CapacityExceeded::Bytes {
                max: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Returns capacity held by `events` events totalling `bytes`.
    pub fn release(&self, events: usize, bytes: usize) {
        // Saturating: a double release must not wrap the counters.
        let _ = self
            .events
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(events))
            });
        let _ = self
            .bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub fn events(&self) -> usize {
        self.events.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

/// The open (unsealed) batch of one destination
#[derive(Debug)]
pub struct EventBuffer {
    destination_id: Arc<str>,
    open: Vec<Arc<CanonicalEvent>>,
    open_bytes: usize,
    oldest: Option<Instant>,
    batch_size: usize,
    next_sequence: u64,
}

impl EventBuffer {
    pub fn new(destination_id: Arc<str>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            destination_id,
            open: Vec::with_capacity(batch_size.min(1_024)),
            open_bytes: 0,
            oldest: None,
            batch_size,
            next_sequence: 0,
        }
    }

    /// Adds one event; returns the sealed batch if it filled up.
    pub fn push(&mut self, event: Arc<CanonicalEvent>, size: usize, now: Instant) -> Option<Batch> {
        if self.open.is_empty() {
            self.oldest = Some(now);
        }
        self.open.push(event);
        self.open_bytes += size;
        if self.open.len() >= self.batch_size {
            self.seal()
        } else {
            None
        }
    }

    /// Seals whatever is open. `None` when empty.
    pub fn seal(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        let events = std::mem::replace(
            &mut self.open,
            Vec::with_capacity(self.batch_size.min(1_024)),
        );
        let batch = Batch {
            destination_id: Arc::clone(&self.destination_id),
            sequence: self.next_sequence,
            events: events.into(),
            bytes: std::mem::take(&mut self.open_bytes),
        };
        self.next_sequence += 1;
        self.oldest = None;
        Some(batch)
    }

    /// When the open batch must be sealed, if anything is open.
    pub fn flush_deadline(&self, flush_interval: Duration) -> Option<Instant> {
        self.oldest.map(|t| t + flush_interval)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn open_bytes(&self) -> usize {
        self.open_bytes
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
