//! Component assembly and lifecycle.
//!
//! The [`Orchestrator`] loads configuration, builds the normalizer, the stream
//! manager and the correlation service, wires alerts and notifications, and owns
//! startup and shutdown.
//!
//! # Startup order (consumers before producers)
//!
//! 1. Stream manager (registers the configured destinations)
//! 2. Correlation service (loads the rule directory)
//! 3. Ingest listener
//!
//! # Shutdown order (producers first)
//!
//! 1. Ingest listener (no new submissions)
//! 2. Correlation service (evaluates everything already queued)
//! 3. Stream manager (final delivery, leftovers reported)

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ironstream_core::config::IronstreamConfig;
use ironstream_core::metrics as m;
use ironstream_core::pipeline::{HealthStatus, Pipeline};
use ironstream_core::types::Alert;
use ironstream_correlation::{
    ChannelAlertSink, CorrelationService, CorrelationSettings, FanoutAlertSink, RuleLoader,
    TracingAlertSink,
};
use ironstream_normalizer::Normalizer;
use ironstream_stream::{StreamManager, StreamNotification};

use crate::handle::IronstreamHandle;
use crate::health::{ComponentHealth, DaemonHealth, aggregate_status};
use crate::ingest::IngestListener;
use crate::metrics_server;

/// Seconds between uptime gauge updates.
const UPTIME_INTERVAL_SECS: u64 = 10;

/// What `--validate` checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    pub destinations: usize,
    pub rules: usize,
    pub chains: usize,
}

/// The daemon: every component plus the tasks that connect them.
pub struct Orchestrator {
    config: IronstreamConfig,
    handle: IronstreamHandle,
    stream: StreamManager,
    correlation: Option<CorrelationService>,
    alert_rx: Option<mpsc::Receiver<Alert>>,
    notification_rx: Option<mpsc::Receiver<StreamNotification>>,
    ingest_cancel: CancellationToken,
    ingest_addr: Option<SocketAddr>,
    ingest_task: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    background: Vec<JoinHandle<()>>,
    started_at: Instant,
    running: bool,
}

impl Orchestrator {
    /// Loads `ironstream.toml` (with environment overrides) and builds every component.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = IronstreamConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
        Self::build_from_config(config).await
    }

    /// Builds from an already-loaded configuration.
    pub async fn build_from_config(config: IronstreamConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info();
        }

        let normalizer = Arc::new(Normalizer::from_core(&config.normalizer));

        let stream = StreamManager::from_core(&config)
            .map_err(|e| anyhow::anyhow!("failed to build stream manager: {e}"))?;
        let notification_rx = stream.take_notifications();

        let (correlation, alert_rx) = if config.correlation.enabled {
            let settings = CorrelationSettings::from_core(&config.correlation)
                .map_err(|e| anyhow::anyhow!("failed to build correlation settings: {e}"))?;
            let (channel_sink, alert_rx) =
                ChannelAlertSink::channel(settings.alert_channel_capacity);
            let sink = FanoutAlertSink::new()
                .with(Arc::new(TracingAlertSink))
                .with(Arc::new(channel_sink));
            (
                Some(CorrelationService::new(settings, Arc::new(sink))),
                Some(alert_rx),
            )
        } else {
            tracing::info!("correlation disabled");
            (None, None)
        };

        let handle = IronstreamHandle::new(
            normalizer,
            stream.clone(),
            correlation.as_ref().map(CorrelationService::handle),
        );
        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            destinations = config.destinations.len(),
            correlation = config.correlation.enabled,
            ingest = config.ingest.enabled,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            handle,
            stream,
            correlation,
            alert_rx,
            notification_rx,
            ingest_cancel: CancellationToken::new(),
            ingest_addr: None,
            ingest_task: None,
            shutdown_tx,
            background: Vec::new(),
            started_at: Instant::now(),
            running: false,
        })
    }

    /// Front end for submissions and administrative operations.
    pub fn handle(&self) -> IronstreamHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &IronstreamConfig {
        &self.config
    }

    /// Takes the alert stream. If nobody takes it before [`start`](Self::start),
    /// alerts are only logged.
    pub fn take_alerts(&mut self) -> Option<mpsc::Receiver<Alert>> {
        self.alert_rx.take()
    }

    /// Takes the delivery-failed / dropped notifications. If nobody takes them
    /// before [`start`](Self::start), they are logged.
    pub fn take_notifications(&mut self) -> Option<mpsc::Receiver<StreamNotification>> {
        self.notification_rx.take()
    }

    /// Bound ingest address while running.
    pub fn ingest_addr(&self) -> Option<SocketAddr> {
        self.ingest_addr
    }

    /// Starts every enabled component; a failure rolls back what already started.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(anyhow::anyhow!("daemon is already running"));
        }

        self.stream
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start stream manager: {e}"))?;

        if let Some(correlation) = self.correlation.as_mut() {
            if let Err(e) = correlation.start().await {
                self.rollback().await;
                return Err(anyhow::anyhow!("failed to start correlation engine: {e}"));
            }
        }

        if self.config.ingest.enabled {
            match IngestListener::bind(&self.config.ingest).await {
                Ok(listener) => {
                    self.ingest_addr = Some(listener.local_addr());
                    self.ingest_cancel = CancellationToken::new();
                    let handle = self.handle.clone();
                    let cancel = self.ingest_cancel.clone();
                    self.ingest_task = Some(tokio::spawn(listener.run(handle, cancel)));
                }
                Err(e) => {
                    self.rollback().await;
                    return Err(anyhow::anyhow!(
                        "failed to bind ingest listener on {}: {e}",
                        self.config.ingest.bind
                    ));
                }
            }
        }

        if let Some(rx) = self.notification_rx.take() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.background
                .push(spawn_notification_logger(rx, shutdown_rx));
        }
        if let Some(rx) = self.alert_rx.take() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.background.push(spawn_alert_drain(rx, shutdown_rx));
        }
        if self.config.metrics.enabled {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.background
                .push(spawn_uptime_updater(self.started_at, shutdown_rx));
        }

        self.running = true;
        tracing::info!(
            ingest_addr = ?self.ingest_addr,
            "ironstream daemon started"
        );
        Ok(())
    }

    /// Stops every component in shutdown order.
    ///
    /// Errors are logged and collected; every component gets its stop call.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.running {
            return Err(anyhow::anyhow!("daemon is not running"));
        }
        self.running = false;
        let mut errors = Vec::new();

        self.ingest_cancel.cancel();
        if let Some(task) = self.ingest_task.take() {
            if let Err(e) = task.await {
                errors.push(format!("ingest: {e}"));
            }
        }
        self.ingest_addr = None;

        if let Some(correlation) = self.correlation.as_mut() {
            if let Err(e) = correlation.stop().await {
                tracing::error!(error = %e, "failed to stop correlation engine");
                errors.push(format!("correlation: {e}"));
            }
        }

        if let Err(e) = self.stream.stop().await {
            tracing::error!(error = %e, "failed to stop stream manager");
            errors.push(format!("stream: {e}"));
        }

        let _ = self.shutdown_tx.send(());
        for task in self.background.drain(..) {
            let _ = task.await;
        }

        if errors.is_empty() {
            tracing::info!("ironstream daemon stopped");
            Ok(())
        } else {
            Err(anyhow::anyhow!("errors during shutdown: {}", errors.join("; ")))
        }
    }

    /// Starts, waits for SIGTERM or SIGINT, then shuts down.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Starts, waits for `shutdown`, then shuts down.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.start().await?;
        shutdown.await;
        self.shutdown().await
    }

    /// Aggregated health of every component, destination and rule.
    pub async fn health(&self) -> DaemonHealth {
        let mut components = vec![ComponentHealth::new(
            "stream",
            true,
            self.stream.health_check().await,
        )];

        match &self.correlation {
            Some(correlation) => components.push(ComponentHealth::new(
                "correlation",
                true,
                correlation.health_check().await,
            )),
            None => components.push(ComponentHealth::new(
                "correlation",
                false,
                HealthStatus::Healthy,
            )),
        }

        let ingest_status = match &self.ingest_task {
            Some(task) if !task.is_finished() => HealthStatus::Healthy,
            Some(_) => HealthStatus::Unhealthy("listener exited".to_owned()),
            None => HealthStatus::Unhealthy("not running".to_owned()),
        };
        components.push(ComponentHealth::new(
            "ingest",
            self.config.ingest.enabled,
            ingest_status,
        ));

        let rules = if self.running {
            self.handle.rule_snapshots().await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "rule snapshots unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let uptime_secs = self.started_at.elapsed().as_secs();
        if self.config.metrics.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
        }

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs,
            components,
            destinations: self.stream.health_all().await,
            rules,
        }
    }

    async fn rollback(&mut self) {
        tracing::warn!("startup failed, stopping components that already started");
        if let Some(correlation) = self.correlation.as_mut() {
            if correlation.state_name() == "running" {
                if let Err(e) = correlation.stop().await {
                    tracing::error!(error = %e, "rollback: failed to stop correlation engine");
                }
            }
        }
        if let Err(e) = self.stream.stop().await {
            tracing::error!(error = %e, "rollback: failed to stop stream manager");
        }
    }
}

/// Checks everything `start` would check, without starting anything.
///
/// Destinations and chains are resolved and the rule directory is parsed; a rule
/// file that fails to load is an error here, where `start` would skip it.
pub async fn validate_config(config: &IronstreamConfig) -> Result<ValidationSummary> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;
    metrics_server::listen_addr(&config.metrics)?;
    StreamManager::from_core(config).map_err(|e| anyhow::anyhow!("invalid destination: {e}"))?;
    let settings = CorrelationSettings::from_core(&config.correlation)
        .map_err(|e| anyhow::anyhow!("invalid attack chain: {e}"))?;

    let mut rules = 0;
    if settings.enabled {
        if let Some(dir) = &settings.rule_dir {
            let mut paths = Vec::new();
            let mut entries = tokio::fs::read_dir(dir)
                .await
                .map_err(|e| anyhow::anyhow!("cannot read rule directory {}: {e}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path
                    .extension()
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
                {
                    paths.push(path);
                }
            }
            paths.sort();
            for path in paths {
                RuleLoader::load_file(&path, settings.limits.max_file_bytes)
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                rules += 1;
            }
            if rules > settings.limits.max_rules {
                return Err(anyhow::anyhow!(
                    "rule directory holds {rules} rules (max: {})",
                    settings.limits.max_rules
                ));
            }
        }
    }

    Ok(ValidationSummary {
        destinations: config.destinations.len(),
        rules,
        chains: settings.chains.len(),
    })
}

/// Waits for SIGTERM or SIGINT and returns its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Logs delivery failures and drops nobody else consumes.
fn log_notification(notification: StreamNotification) {
    match notification {
        StreamNotification::DeliveryFailed { destination_id, sequence, events, attempts, error } => {
            tracing::warn!(
                destination = %destination_id,
                sequence,
                events,
                attempts,
                error = %error,
                "batch moved to dead-letter store"
            );
        }
        StreamNotification::Dropped { destination_id, sequence, events, reason } => {
            tracing::error!(
                destination = %destination_id,
                sequence,
                events,
                reason = %reason,
                "batch dropped without delivery"
            );
        }
    }
}

fn spawn_notification_logger(
    mut rx: mpsc::Receiver<StreamNotification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(notification) => log_notification(notification),
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    // the stream manager announces its leftovers while stopping
                    while let Ok(notification) = rx.try_recv() {
                        log_notification(notification);
                    }
                    break;
                }
            }
        }
        tracing::debug!("notification logger stopped");
    })
}

/// Consumes the alert channel when no embedder took it; the tracing sink has
/// already logged every alert.
fn spawn_alert_drain(
    mut rx: mpsc::Receiver<Alert>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(alert) => tracing::trace!(alert_id = %alert.id, "alert drained"),
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        tracing::debug!("alert drain stopped");
    })
}

fn record_build_info() {
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

fn spawn_uptime_updater(
    started_at: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(UPTIME_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(started_at.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}
