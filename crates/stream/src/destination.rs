//! Destination task and its handle
//!
//! Every destination runs one tokio task that owns its open buffer, the FIFO of
//! sealed batches, the circuit breaker and the dead-letter store. The task reacts to
//! four sources in a single `select!`:
//!
//! 1. commands from the [`DestinationHandle`] (events, flush, shutdown)
//! 2. the flush deadline of the open batch (oldest event + flush interval)
//! 3. the retry deadline of the head batch (backoff or circuit cooldown)
//! 4. the dead-letter retry interval
//!
//! Only the head batch is ever in flight, so batches reach the connector in
//! sequence order. A failing head blocks later batches until it is delivered or
//! dead-lettered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ironstream_core::event::CanonicalEvent;
use ironstream_core::pipeline::HealthStatus;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::batch::{Batch, EncodedBatch};
use crate::buffer::{BufferGauge, EventBuffer};
use crate::circuit::CircuitBreaker;
use crate::config::{DestinationSettings, StreamSettings};
use crate::connector::Connector;
use crate::dead_letter::{DeadLetterEntry, DeadLetterStore};
use crate::error::{DeliveryError, StreamError};
use crate::notification::{DropReason, Notifier, StreamNotification};
use crate::stats::{DestinationHealth, DestinationStats, derive_status};

/// What happened to one event offered to one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Reserved buffer space and handed to the destination task
    Accepted,
    /// Rejected by the destination's filter rules
    Filtered,
    /// Dropped by the sampling policy
    SampledOut,
    /// The destination is disabled
    Disabled,
}

/// Result of a destination shutdown or delete
///
/// `leftovers` holds every batch that was not delivered, including what was already
/// in the dead-letter store, oldest first.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub destination_id: String,
    pub delivered_batches: u64,
    pub leftovers: Vec<DeadLetterEntry>,
}

impl ShutdownReport {
    pub fn leftover_events(&self) -> usize {
        self.leftovers.iter().map(|e| e.batch.len()).sum()
    }

    /// Undelivered events in sequence order.
    pub fn events(&self) -> impl Iterator<Item = &Arc<CanonicalEvent>> {
        self.leftovers.iter().flat_map(|e| e.batch.events.iter())
    }
}

/// First stage of an enqueue
pub(crate) enum Admission {
    Done(Result<EnqueueOutcome, StreamError>),
    /// Buffer full; the event is admitted only after a flush
    NeedsFlush(Arc<CanonicalEvent>),
}

enum Command {
    Event {
        event: Arc<CanonicalEvent>,
        size: usize,
    },
    Flush(oneshot::Sender<()>),
    Shutdown {
        grace: Duration,
        reply: oneshot::Sender<ShutdownReport>,
    },
}

type HealthProbe = Box<dyn Fn() -> HealthStatus + Send + Sync>;

/// Enqueue side of one destination
pub struct DestinationHandle {
    settings: Arc<DestinationSettings>,
    enabled: AtomicBool,
    flush_on_memory_pressure: bool,
    commands: mpsc::Sender<Command>,
    gauge: Arc<BufferGauge>,
    stats: Arc<DestinationStats>,
    connector_health: HealthProbe,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DestinationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationHandle")
            .field("id", &self.settings.id)
            .field("enabled", &self.is_enabled())
            .field("buffered", &self.gauge.events())
            .finish()
    }
}

impl DestinationHandle {
    /// Spawns the destination task on the current runtime.
    pub fn spawn<C: Connector>(
        settings: DestinationSettings,
        stream: Arc<StreamSettings>,
        connector: Arc<C>,
        notifier: Notifier,
    ) -> Arc<Self> {
        let settings = Arc::new(settings);
        let (tx, rx) = mpsc::channel(stream.destination_channel_capacity);
        let gauge = Arc::new(BufferGauge::new(
            stream.max_buffer_events,
            stream.max_buffer_bytes,
        ));
        let stats = Arc::new(DestinationStats::new(&settings.id));

        let probe = Arc::clone(&connector);
        let task = DestinationTask {
            buffer: EventBuffer::new(Arc::from(settings.id.as_str()), settings.batch_size),
            pending: VecDeque::new(),
            circuit: CircuitBreaker::new(stream.circuit_failure_threshold, stream.circuit_cooldown),
            dead_letters: DeadLetterStore::new(stream.dead_letter_max_entries),
            next_attempt_at: None,
            delivered_batches: 0,
            settings: Arc::clone(&settings),
            stream: Arc::clone(&stream),
            connector,
            gauge: Arc::clone(&gauge),
            stats: Arc::clone(&stats),
            notifier,
            commands: rx,
        };

        tracing::info!(
            destination = %settings.id,
            protocol = %settings.protocol,
            format = %settings.format,
            endpoint = %settings.endpoint,
            batch_size = settings.batch_size,
            "destination registered"
        );

        Arc::new(Self {
            enabled: AtomicBool::new(settings.enabled),
            flush_on_memory_pressure: stream.flush_on_memory_pressure,
            settings,
            commands: tx,
            gauge,
            stats,
            connector_health: Box::new(move || probe.health()),
            task: std::sync::Mutex::new(Some(tokio::spawn(task.run()))),
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn priority(&self) -> u8 {
        self.settings.priority
    }

    pub fn settings(&self) -> &DestinationSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            tracing::info!(destination = %self.settings.id, enabled, "destination toggled");
        }
    }

    pub fn stats(&self) -> &DestinationStats {
        &self.stats
    }

    /// Events buffered or sealed but not yet delivered.
    pub fn buffered_events(&self) -> usize {
        self.gauge.events()
    }

    /// Offers one event: enabled check, filters, sampling, capacity, then hand-off.
    pub async fn enqueue(&self, event: Arc<CanonicalEvent>) -> Result<EnqueueOutcome, StreamError> {
        match self.admit(event) {
            Admission::Done(result) => result,
            Admission::NeedsFlush(event) => self.enqueue_after_flush(event).await,
        }
    }

    /// The non-blocking part of [`enqueue`](Self::enqueue). A full buffer with
    /// `flush_on_memory_pressure` comes back as [`Admission::NeedsFlush`].
    pub(crate) fn admit(&self, event: Arc<CanonicalEvent>) -> Admission {
        if !self.is_enabled() {
            self.stats.record_disabled();
            return Admission::Done(Ok(EnqueueOutcome::Disabled));
        }
        if !self.settings.filters.admits(&event) {
            self.stats.record_filtered();
            return Admission::Done(Ok(EnqueueOutcome::Filtered));
        }
        if !self.sample(&event) {
            self.stats.record_sampled_out();
            return Admission::Done(Ok(EnqueueOutcome::SampledOut));
        }

        let size = event.approx_size();
        if let Err(full) = self.gauge.try_reserve(size) {
            if !self.flush_on_memory_pressure {
                return Admission::Done(Err(self.reject(full.describe())));
            }
            return Admission::NeedsFlush(event);
        }
        Admission::Done(self.hand_off(event, size))
    }

    /// Flushes once, then retries the reservation.
    pub(crate) async fn enqueue_after_flush(
        &self,
        event: Arc<CanonicalEvent>,
    ) -> Result<EnqueueOutcome, StreamError> {
        tracing::debug!(destination = %self.settings.id, "buffer full, requesting flush");
        self.flush().await?;
        let size = event.approx_size();
        if let Err(full) = self.gauge.try_reserve(size) {
            return Err(self.reject(full.describe()));
        }
        self.hand_off(event, size)
    }

    /// Sends an event whose buffer space is already reserved.
    fn hand_off(&self, event: Arc<CanonicalEvent>, size: usize) -> Result<EnqueueOutcome, StreamError> {
        match self.commands.try_send(Command::Event { event, size }) {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(EnqueueOutcome::Accepted)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.gauge.release(1, size);
                Err(self.reject("command queue full"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.gauge.release(1, size);
                Err(StreamError::Closed(self.settings.id.clone()))
            }
        }
    }

    fn sample(&self, event: &CanonicalEvent) -> bool {
        self.settings
            .sampling
            .keep(event.severity(), &mut rand::thread_rng())
    }

    fn reject(&self, reason: impl Into<String>) -> StreamError {
        self.stats.record_rejected();
        let err = StreamError::backpressure(&self.settings.id, reason);
        tracing::debug!(error = %err, "event rejected");
        err
    }

    /// Seals the open batch and attempts delivery of everything pending now,
    /// ignoring backoff but not the circuit breaker.
    pub async fn flush(&self) -> Result<(), StreamError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(tx))
            .await
            .map_err(|_| StreamError::Closed(self.settings.id.clone()))?;
        rx.await
            .map_err(|_| StreamError::Closed(self.settings.id.clone()))
    }

    /// Final delivery within `grace`, then stops the task.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .commands
            .send(Command::Shutdown { grace, reply: tx })
            .await
            .is_ok();
        let report = if sent {
            rx.await.unwrap_or_default()
        } else {
            ShutdownReport::default()
        };

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(destination = %self.settings.id, error = %e, "destination task failed");
            }
        }

        ShutdownReport {
            destination_id: self.settings.id.clone(),
            ..report
        }
    }

    pub fn health(&self) -> DestinationHealth {
        let circuit = self.stats.circuit();
        let dead_letter_size = self.stats.dead_letter_size();
        let connector = (self.connector_health)();
        DestinationHealth {
            id: self.settings.id.clone(),
            name: self.settings.name.clone(),
            protocol: self.settings.protocol.to_string(),
            format: self.settings.format.to_string(),
            enabled: self.is_enabled(),
            priority: self.settings.priority,
            status: derive_status(circuit, dead_letter_size, &connector),
            circuit,
            connector,
            buffered_events: self.gauge.events(),
            buffered_bytes: self.gauge.bytes(),
            dead_letter_size,
            mean_latency_ms: self
                .stats
                .mean_latency()
                .map(|d| d.as_secs_f64() * 1_000.0),
            counters: self.stats.counters(),
        }
    }
}

struct PendingBatch {
    batch: Batch,
    encoded: EncodedBatch,
    attempts: u32,
    last_error: Option<String>,
}

struct DestinationTask<C> {
    settings: Arc<DestinationSettings>,
    stream: Arc<StreamSettings>,
    connector: Arc<C>,
    buffer: EventBuffer,
    pending: VecDeque<PendingBatch>,
    circuit: CircuitBreaker,
    dead_letters: DeadLetterStore,
    next_attempt_at: Option<Instant>,
    delivered_batches: u64,
    gauge: Arc<BufferGauge>,
    stats: Arc<DestinationStats>,
    notifier: Notifier,
    commands: mpsc::Receiver<Command>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn attempt<C: Connector>(
    connector: &C,
    encoded: &EncodedBatch,
    timeout: Duration,
) -> Result<Duration, DeliveryError> {
    let started = Instant::now();
    match tokio::time::timeout(timeout, connector.send(encoded)).await {
        Ok(Ok(())) => Ok(started.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DeliveryError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

impl<C: Connector> DestinationTask<C> {
    async fn run(mut self) {
        let period = self.stream.dead_letter_retry_interval;
        let mut dead_letter_tick = tokio::time::interval_at(Instant::now() + period, period);
        dead_letter_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flush_at = self.buffer.flush_deadline(self.settings.flush_interval);
            let retry_at = if self.pending.is_empty() {
                None
            } else {
                self.next_attempt_at
            };

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Event { event, size }) => self.on_event(event, size).await,
                    Some(Command::Flush(reply)) => {
                        self.seal_open();
                        self.deliver_pending(true).await;
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { grace, reply }) => {
                        let report = self.shutdown(grace).await;
                        let _ = reply.send(report);
                        break;
                    }
                    None => {
                        let grace = self.stream.shutdown_grace;
                        let report = self.shutdown(grace).await;
                        if !report.leftovers.is_empty() {
                            tracing::warn!(
                                destination = %self.settings.id,
                                events = report.leftover_events(),
                                "handle dropped with undelivered events"
                            );
                        }
                        break;
                    }
                },
                () = sleep_until_opt(flush_at) => {
                    self.seal_open();
                    self.deliver_pending(false).await;
                }
                () = sleep_until_opt(retry_at) => {
                    self.deliver_pending(false).await;
                }
                _ = dead_letter_tick.tick() => {
                    self.retry_dead_letter().await;
                }
            }
        }
        tracing::debug!(destination = %self.settings.id, "destination task stopped");
    }

    async fn on_event(&mut self, event: Arc<CanonicalEvent>, size: usize) {
        let now = Instant::now();
        if let Some(batch) = self.buffer.push(event, size, now) {
            self.push_sealed(batch);
        } else if self
            .buffer
            .flush_deadline(self.settings.flush_interval)
            .is_some_and(|deadline| deadline <= now)
        {
            // a steady command stream must not starve the flush deadline
            self.seal_open();
        }
        self.stats.set_buffered(self.gauge.events());
        if !self.pending.is_empty() {
            self.deliver_pending(false).await;
        }
    }

    fn seal_open(&mut self) {
        if let Some(batch) = self.buffer.seal() {
            self.push_sealed(batch);
        }
    }

    fn push_sealed(&mut self, batch: Batch) {
        tracing::trace!(
            destination = %self.settings.id,
            sequence = batch.sequence,
            events = batch.len(),
            "batch sealed"
        );
        let encoded = batch.encode(self.settings.format, self.settings.compression);
        self.pending.push_back(PendingBatch {
            batch,
            encoded,
            attempts: 0,
            last_error: None,
        });
    }

    /// Delivers pending batches head-first until one fails, the circuit blocks, or
    /// the queue is empty. `force` ignores the backoff deadline.
    async fn deliver_pending(&mut self, force: bool) {
        loop {
            if self.pending.is_empty() {
                self.next_attempt_at = None;
                break;
            }
            let now = Instant::now();
            if !force && self.next_attempt_at.is_some_and(|at| now < at) {
                break;
            }
            if !self.circuit.allow(now) {
                self.next_attempt_at = self.circuit.open_until();
                self.stats.set_circuit(self.circuit.kind());
                break;
            }
            self.stats.set_circuit(self.circuit.kind());

            let connector = Arc::clone(&self.connector);
            let result = match self.pending.front() {
                Some(head) => {
                    attempt(connector.as_ref(), &head.encoded, self.stream.delivery_timeout).await
                }
                None => break,
            };

            let Some(mut head) = self.pending.pop_front() else {
                break;
            };
            match result {
                Ok(latency) => {
                    self.circuit.on_success();
                    self.stats.set_circuit(self.circuit.kind());
                    self.stats.record_delivered(head.batch.len(), latency);
                    self.gauge.release(head.batch.len(), head.batch.bytes);
                    self.stats.set_buffered(self.gauge.events());
                    self.delivered_batches += 1;
                    self.next_attempt_at = None;
                    tracing::debug!(
                        destination = %self.settings.id,
                        sequence = head.batch.sequence,
                        events = head.batch.len(),
                        latency_ms = latency.as_millis() as u64,
                        "batch delivered"
                    );
                }
                Err(err) => {
                    let now = Instant::now();
                    head.attempts += 1;
                    head.last_error = Some(err.to_string());
                    self.stats.record_failed_attempt(head.batch.len());
                    let opened = self.circuit.on_failure(now);
                    self.stats.set_circuit(self.circuit.kind());

                    if head.attempts > self.stream.max_retries {
                        tracing::warn!(
                            destination = %self.settings.id,
                            sequence = head.batch.sequence,
                            attempts = head.attempts,
                            error = %err,
                            "delivery retries exhausted, dead-lettering batch"
                        );
                        self.dead_letter_failed(head, now);
                        self.next_attempt_at = None;
                        continue;
                    }

                    let backoff_until = now + self.stream.backoff_for(head.attempts);
                    self.next_attempt_at = match (opened, self.circuit.open_until()) {
                        (true, Some(until)) => Some(until.max(backoff_until)),
                        _ => Some(backoff_until),
                    };
                    tracing::debug!(
                        destination = %self.settings.id,
                        sequence = head.batch.sequence,
                        attempt = head.attempts,
                        error = %err,
                        "delivery failed, will retry"
                    );
                    self.pending.push_front(head);
                    break;
                }
            }
        }
    }

    /// Moves an exhausted batch into the dead-letter store.
    fn dead_letter_failed(&mut self, pending: PendingBatch, now: Instant) {
        let events = pending.batch.len();
        let last_error = pending
            .last_error
            .unwrap_or_else(|| "not delivered".to_owned());
        self.gauge.release(events, pending.batch.bytes);
        self.stats.set_buffered(self.gauge.events());
        self.stats.record_dead_lettered(events);
        self.notifier.notify(StreamNotification::DeliveryFailed {
            destination_id: self.settings.id.clone(),
            sequence: pending.batch.sequence,
            events,
            attempts: pending.attempts,
            error: last_error.clone(),
        });

        let entry = DeadLetterEntry::new(pending.batch, pending.attempts, last_error, now);
        if let Some(evicted) = self.dead_letters.push(entry) {
            self.drop_entry(evicted, DropReason::DeadLetterOverflow);
        }
        self.stats.set_dead_letter_size(self.dead_letters.len());
    }

    fn drop_entry(&self, entry: DeadLetterEntry, reason: DropReason) {
        let events = entry.batch.len();
        tracing::warn!(
            destination = %self.settings.id,
            sequence = entry.batch.sequence,
            events,
            reason = reason.as_str(),
            last_error = %entry.last_error,
            "batch dropped"
        );
        self.stats.record_dropped(events, reason.as_str());
        self.notifier.notify(StreamNotification::Dropped {
            destination_id: self.settings.id.clone(),
            sequence: entry.batch.sequence,
            events,
            reason,
        });
    }

    /// Retries the oldest dead-lettered batch once, if the circuit allows.
    async fn retry_dead_letter(&mut self) {
        if self.dead_letters.is_empty() || self.stream.dead_letter_max_attempts == 0 {
            return;
        }
        if !self.circuit.allow(Instant::now()) {
            self.stats.set_circuit(self.circuit.kind());
            return;
        }
        let Some(mut entry) = self.dead_letters.pop() else {
            return;
        };
        let encoded = entry
            .batch
            .encode(self.settings.format, self.settings.compression);
        let connector = Arc::clone(&self.connector);
        match attempt(connector.as_ref(), &encoded, self.stream.delivery_timeout).await {
            Ok(latency) => {
                self.circuit.on_success();
                self.stats.record_delivered(entry.batch.len(), latency);
                self.delivered_batches += 1;
                tracing::info!(
                    destination = %self.settings.id,
                    sequence = entry.batch.sequence,
                    "dead-lettered batch delivered"
                );
            }
            Err(err) => {
                self.circuit.on_failure(Instant::now());
                self.stats.record_failed_attempt(entry.batch.len());
                entry.attempts += 1;
                entry.dead_letter_attempts += 1;
                entry.last_error = err.to_string();
                if entry.dead_letter_attempts >= self.stream.dead_letter_max_attempts {
                    self.drop_entry(entry, DropReason::RetriesExhausted);
                } else {
                    self.dead_letters.push_front(entry);
                }
            }
        }
        self.stats.set_circuit(self.circuit.kind());
        self.stats.set_dead_letter_size(self.dead_letters.len());
    }

    async fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        // take whatever is still queued behind the shutdown command
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Event { event, size } => {
                    if let Some(batch) = self.buffer.push(event, size, Instant::now()) {
                        self.push_sealed(batch);
                    }
                }
                Command::Flush(reply) => {
                    let _ = reply.send(());
                }
                Command::Shutdown { reply, .. } => {
                    let _ = reply.send(ShutdownReport::default());
                }
            }
        }
        self.seal_open();

        let deadline = Instant::now() + grace;
        if tokio::time::timeout_at(deadline, self.drain_pending())
            .await
            .is_err()
        {
            tracing::warn!(
                destination = %self.settings.id,
                pending = self.pending.len(),
                "shutdown grace period elapsed"
            );
        }

        let mut leftovers = self.dead_letters.drain();
        let now = Instant::now();
        for pending in self.pending.drain(..) {
            let events = pending.batch.len();
            let last_error = pending
                .last_error
                .unwrap_or_else(|| "shutdown before delivery".to_owned());
            self.gauge.release(events, pending.batch.bytes);
            self.stats.record_dead_lettered(events);
            self.notifier.notify(StreamNotification::DeliveryFailed {
                destination_id: self.settings.id.clone(),
                sequence: pending.batch.sequence,
                events,
                attempts: pending.attempts,
                error: last_error.clone(),
            });
            leftovers.push(DeadLetterEntry::new(
                pending.batch,
                pending.attempts,
                last_error,
                now,
            ));
        }
        self.stats.set_dead_letter_size(0);
        self.stats.set_buffered(self.gauge.events());

        let report = ShutdownReport {
            destination_id: self.settings.id.clone(),
            delivered_batches: self.delivered_batches,
            leftovers,
        };
        tracing::info!(
            destination = %self.settings.id,
            delivered_batches = report.delivered_batches,
            leftover_events = report.leftover_events(),
            "destination shut down"
        );
        report
    }

    /// Delivers until nothing is pending, honouring backoff and the circuit.
    async fn drain_pending(&mut self) {
        while !self.pending.is_empty() {
            self.deliver_pending(true).await;
            if self.pending.is_empty() {
                break;
            }
            match self.next_attempt_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => tokio::task::yield_now().await,
            }
        }
    }
}
