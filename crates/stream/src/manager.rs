//! Stream manager -- destination registry and fan-out
//!
//! [`StreamManager`] is a cheap clonable handle. Clones share one registry, so the
//! orchestrator can drive the lifecycle while ingest tasks dispatch events.
//!
//! # Fan-out
//! [`dispatch`](StreamManager::dispatch) offers an event to every registered
//! destination, highest priority first. Each destination decides independently
//! (disabled, filtered, sampled out, accepted, or rejected with backpressure), and a
//! full or failing destination never blocks the others.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};

use ironstream_core::config::IronstreamConfig;
use ironstream_core::error::{IronstreamError, PipelineError};
use ironstream_core::event::CanonicalEvent;
use ironstream_core::pipeline::{HealthStatus, Pipeline};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinSet;

use crate::config::{DestinationSettings, ProtocolKind, StreamSettings};
use crate::connector::{Connector, FileConnector, TcpSyslogConnector, UdpSyslogConnector};
use crate::destination::{Admission, DestinationHandle, EnqueueOutcome, ShutdownReport};
use crate::error::StreamError;
use crate::notification::{DropReason, Notifier, StreamNotification};
use crate::stats::DestinationHealth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Initialized,
    Running,
    Stopped,
}

/// Per-destination result of one dispatch
#[derive(Debug)]
pub struct DestinationOutcome {
    pub destination_id: String,
    pub result: Result<EnqueueOutcome, StreamError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl DispatchReport {
    /// Destinations that buffered the event.
    pub fn accepted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, Ok(EnqueueOutcome::Accepted)))
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &StreamError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    /// `true` when no destination accepted the event and at least one refused it
    /// for capacity. Filtered, sampled-out and disabled outcomes are not refusals.
    pub fn is_backpressured(&self) -> bool {
        self.accepted() == 0 && self.errors().any(StreamError::is_backpressure)
    }

    /// First backpressure error, for reporting to the submitter.
    pub fn backpressure(&self) -> Option<&StreamError> {
        self.errors().find(|e| e.is_backpressure())
    }
}

struct Inner {
    settings: Arc<StreamSettings>,
    configured: Vec<DestinationSettings>,
    destinations: RwLock<BTreeMap<String, Arc<DestinationHandle>>>,
    notifier: Notifier,
    notifications: StdMutex<Option<mpsc::Receiver<StreamNotification>>>,
    state: Mutex<ManagerState>,
}

#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("configured", &self.inner.configured.len())
            .finish()
    }
}

impl StreamManager {
    /// Manager with no statically configured destinations.
    pub fn new(settings: StreamSettings) -> Self {
        Self::with_destinations(settings, Vec::new())
    }

    /// Manager that registers `configured` when started.
    pub fn with_destinations(settings: StreamSettings, configured: Vec<DestinationSettings>) -> Self {
        let (tx, rx) = mpsc::channel(settings.notification_channel_capacity);
        Self {
            inner: Arc::new(Inner {
                settings: Arc::new(settings),
                configured,
                destinations: RwLock::new(BTreeMap::new()),
                notifier: Notifier::new(tx),
                notifications: StdMutex::new(Some(rx)),
                state: Mutex::new(ManagerState::Initialized),
            }),
        }
    }

    /// Builds from the full config; every destination entry is resolved up front.
    pub fn from_core(config: &IronstreamConfig) -> Result<Self, StreamError> {
        let destinations = config
            .destinations
            .iter()
            .map(DestinationSettings::from_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_destinations(
            StreamSettings::from_core(&config.stream),
            destinations,
        ))
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.inner.settings
    }

    /// Takes the notification receiver. Only the first call gets it.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<StreamNotification>> {
        self.inner
            .notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Registers a destination with the built-in connector for its protocol.
    pub async fn register(&self, settings: DestinationSettings) -> Result<(), StreamError> {
        match settings.protocol {
            ProtocolKind::TcpSyslog => {
                let connector = TcpSyslogConnector::new(settings.endpoint.clone(), settings.framing);
                self.register_with(settings, connector).await
            }
            ProtocolKind::UdpSyslog => {
                let connector = UdpSyslogConnector::new(settings.endpoint.clone());
                self.register_with(settings, connector).await
            }
            ProtocolKind::File => {
                let connector = FileConnector::new(settings.endpoint.clone());
                self.register_with(settings, connector).await
            }
        }
    }

    /// Registers a destination backed by a caller-supplied connector.
    pub async fn register_with<C: Connector>(
        &self,
        settings: DestinationSettings,
        connector: C,
    ) -> Result<(), StreamError> {
        let mut destinations = self.inner.destinations.write().await;
        if destinations.contains_key(&settings.id) {
            return Err(StreamError::AlreadyRegistered(settings.id));
        }
        let id = settings.id.clone();
        let handle = DestinationHandle::spawn(
            settings,
            Arc::clone(&self.inner.settings),
            Arc::new(connector),
            self.inner.notifier.clone(),
        );
        destinations.insert(id, handle);
        Ok(())
    }

    /// Enables or disables fan-out to one destination. Buffered events still deliver.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StreamError> {
        self.handle(id).await?.set_enabled(enabled);
        Ok(())
    }

    /// Flushes and tears down one destination, returning what could not be delivered.
    pub async fn delete(&self, id: &str) -> Result<ShutdownReport, StreamError> {
        let handle = self
            .inner
            .destinations
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StreamError::UnknownDestination(id.to_owned()))?;
        let report = handle.shutdown(self.inner.settings.shutdown_grace).await;
        tracing::info!(
            destination = id,
            leftover_events = report.leftover_events(),
            "destination deleted"
        );
        Ok(report)
    }

    /// Seals and attempts delivery on one destination now.
    pub async fn flush(&self, id: &str) -> Result<(), StreamError> {
        self.handle(id).await?.flush().await
    }

    /// Offers `event` to every destination, highest priority first.
    ///
    /// Destinations with room take the event immediately. Full destinations that
    /// flush on memory pressure run their flush concurrently after that, so a slow
    /// connector delays only its own outcome.
    pub async fn dispatch(&self, event: Arc<CanonicalEvent>) -> DispatchReport {
        let targets = self.by_priority().await;
        let mut results: Vec<Option<Result<EnqueueOutcome, StreamError>>> =
            Vec::with_capacity(targets.len());
        let mut pressured = JoinSet::new();

        for (index, handle) in targets.iter().enumerate() {
            match handle.admit(Arc::clone(&event)) {
                Admission::Done(result) => results.push(Some(result)),
                Admission::NeedsFlush(event) => {
                    results.push(None);
                    let handle = Arc::clone(handle);
                    pressured.spawn(async move { (index, handle.enqueue_after_flush(event).await) });
                }
            }
        }
        while let Some(joined) = pressured.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "pressured enqueue task failed"),
            }
        }

        DispatchReport {
            outcomes: targets
                .iter()
                .zip(results)
                .map(|(handle, result)| DestinationOutcome {
                    destination_id: handle.id().to_owned(),
                    result: result
                        .unwrap_or_else(|| Err(StreamError::Closed(handle.id().to_owned()))),
                })
                .collect(),
        }
    }

    /// Offers `event` to a single destination.
    pub async fn dispatch_to(
        &self,
        id: &str,
        event: Arc<CanonicalEvent>,
    ) -> Result<EnqueueOutcome, StreamError> {
        self.handle(id).await?.enqueue(event).await
    }

    pub async fn health(&self, id: &str) -> Result<DestinationHealth, StreamError> {
        Ok(self.handle(id).await?.health())
    }

    /// Health of every destination, by id.
    pub async fn health_all(&self) -> Vec<DestinationHealth> {
        self.inner
            .destinations
            .read()
            .await
            .values()
            .map(|h| h.health())
            .collect()
    }

    pub async fn destination_ids(&self) -> Vec<String> {
        self.inner.destinations.read().await.keys().cloned().collect()
    }

    pub async fn destination_count(&self) -> usize {
        self.inner.destinations.read().await.len()
    }

    /// Shuts every destination down concurrently.
    pub async fn shutdown_all(&self) -> Vec<ShutdownReport> {
        let handles = std::mem::take(&mut *self.inner.destinations.write().await);
        let grace = self.inner.settings.shutdown_grace;
        let mut set = JoinSet::new();
        for handle in handles.into_values() {
            set.spawn(async move { handle.shutdown(grace).await });
        }
        let mut reports = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "destination shutdown task failed"),
            }
        }
        reports.sort_by(|a, b| a.destination_id.cmp(&b.destination_id));
        reports
    }

    async fn handle(&self, id: &str) -> Result<Arc<DestinationHandle>, StreamError> {
        self.inner
            .destinations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::UnknownDestination(id.to_owned()))
    }

    async fn by_priority(&self) -> Vec<Arc<DestinationHandle>> {
        let mut handles: Vec<_> = self
            .inner
            .destinations
            .read()
            .await
            .values()
            .cloned()
            .collect();
        // BTreeMap order is by id; the stable sort keeps it within a priority
        handles.sort_by(|a, b| b.priority().cmp(&a.priority()));
        handles
    }
}

impl Pipeline for StreamManager {
    async fn start(&mut self) -> Result<(), IronstreamError> {
        let mut state = self.inner.state.lock().await;
        if *state == ManagerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        for settings in self.inner.configured.clone() {
            self.register(settings).await?;
        }
        *state = ManagerState::Running;
        tracing::info!(
            destinations = self.inner.configured.len(),
            "stream manager started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), IronstreamError> {
        let mut state = self.inner.state.lock().await;
        if *state != ManagerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        let reports = self.shutdown_all().await;
        let leftover: usize = reports.iter().map(ShutdownReport::leftover_events).sum();
        if leftover > 0 {
            tracing::warn!(
                leftover_events = leftover,
                "undelivered events remained after shutdown"
            );
        }
        // stop has no caller to return the reports to
        for report in &reports {
            for entry in &report.leftovers {
                self.inner.notifier.notify(StreamNotification::Dropped {
                    destination_id: report.destination_id.clone(),
                    sequence: entry.batch.sequence,
                    events: entry.batch.len(),
                    reason: DropReason::Shutdown,
                });
            }
        }
        *state = ManagerState::Stopped;
        tracing::info!("stream manager stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match *self.inner.state.lock().await {
            ManagerState::Initialized => return HealthStatus::Unhealthy("not started".to_owned()),
            ManagerState::Stopped => return HealthStatus::Unhealthy("stopped".to_owned()),
            ManagerState::Running => {}
        }

        let health = self.health_all().await;
        let troubled: Vec<String> = health
            .iter()
            .filter(|h| !h.status.is_healthy())
            .map(|h| format!("{} {}", h.id, h.status))
            .collect();
        let all_down = !health.is_empty() && health.iter().all(|h| h.status.is_unhealthy());
        if all_down {
            HealthStatus::Unhealthy(troubled.join("; "))
        } else if troubled.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded(troubled.join("; "))
        }
    }
}
