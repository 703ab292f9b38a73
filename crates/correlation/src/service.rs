//! Correlation service -- the task that owns the engine.
//!
//! Every event and every administrative operation reaches the engine as a message
//! on one bounded channel, so rule state is mutated by a single task and events
//! are evaluated in submission order. [`CorrelationHandle`] is the cloneable
//! front end; [`CorrelationService`] implements the [`Pipeline`] lifecycle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use ironstream_core::error::{IronstreamError, PipelineError};
use ironstream_core::event::CanonicalEvent;
use ironstream_core::pipeline::{HealthStatus, Pipeline};

use crate::chain::ChainSnapshot;
use crate::config::CorrelationSettings;
use crate::engine::{CorrelationEngine, RuleSnapshot};
use crate::error::CorrelationError;
use crate::rule::{CorrelationRule, RuleLoader};
use crate::sink::AlertSink;

/// Queue fill ratio above which health reports degraded.
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

enum Command {
    Event(Arc<CanonicalEvent>),
    AddRule {
        rule: Box<CorrelationRule>,
        reply: oneshot::Sender<Result<(), CorrelationError>>,
    },
    RemoveRule {
        rule_id: String,
        reply: oneshot::Sender<Option<CorrelationRule>>,
    },
    SetEnabled {
        rule_id: String,
        enabled: bool,
        reply: oneshot::Sender<Result<(), CorrelationError>>,
    },
    Snapshots {
        reply: oneshot::Sender<Vec<RuleSnapshot>>,
    },
    Chains {
        reply: oneshot::Sender<Vec<ChainSnapshot>>,
    },
    /// Replies once everything queued before it has been evaluated
    Flush {
        reply: oneshot::Sender<u64>,
    },
    Shutdown,
}

/// Cloneable front end of the engine task
///
/// Requests sent before the service starts wait in the queue and are answered
/// once it runs.
#[derive(Clone)]
pub struct CorrelationHandle {
    tx: mpsc::Sender<Command>,
    capacity: usize,
}

impl std::fmt::Debug for CorrelationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationHandle")
            .field("capacity", &self.capacity)
            .field("queued", &self.queued())
            .finish()
    }
}

impl CorrelationHandle {
    /// Queues an event without waiting; a full queue is backpressure.
    pub fn try_submit(&self, event: Arc<CanonicalEvent>) -> Result<(), CorrelationError> {
        self.tx.try_send(Command::Event(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CorrelationError::Backpressure {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => CorrelationError::Closed,
        })
    }

    /// Reserves one queue slot without waiting.
    ///
    /// Lets a caller commit the event only after its other admission checks pass;
    /// dropping the permit gives the slot back.
    pub fn try_reserve(&self) -> Result<EventPermit<'_>, CorrelationError> {
        self.tx
            .try_reserve()
            .map(|permit| EventPermit { permit })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(()) => CorrelationError::Backpressure {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(()) => CorrelationError::Closed,
            })
    }

    /// Queues an event, waiting for room.
    pub async fn submit(&self, event: Arc<CanonicalEvent>) -> Result<(), CorrelationError> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| CorrelationError::Closed)
    }

    pub async fn add_rule(&self, rule: CorrelationRule) -> Result<(), CorrelationError> {
        self.request(|reply| Command::AddRule {
            rule: Box::new(rule),
            reply,
        })
        .await?
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Result<CorrelationRule, CorrelationError> {
        let rule_id = rule_id.to_owned();
        let missing = CorrelationError::UnknownRule(rule_id.clone());
        self.request(|reply| Command::RemoveRule { rule_id, reply })
            .await?
            .ok_or(missing)
    }

    pub async fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), CorrelationError> {
        let rule_id = rule_id.to_owned();
        self.request(|reply| Command::SetEnabled {
            rule_id,
            enabled,
            reply,
        })
        .await?
    }

    /// Snapshots of every rule, in evaluation order.
    pub async fn snapshots(&self) -> Result<Vec<RuleSnapshot>, CorrelationError> {
        self.request(|reply| Command::Snapshots { reply }).await
    }

    pub async fn snapshot(&self, rule_id: &str) -> Result<RuleSnapshot, CorrelationError> {
        self.snapshots()
            .await?
            .into_iter()
            .find(|s| s.id == rule_id)
            .ok_or_else(|| CorrelationError::UnknownRule(rule_id.to_owned()))
    }

    pub async fn chain_snapshots(&self) -> Result<Vec<ChainSnapshot>, CorrelationError> {
        self.request(|reply| Command::Chains { reply }).await
    }

    /// Waits until every previously queued event is evaluated.
    ///
    /// Returns the total number of events evaluated so far.
    pub async fn flush(&self) -> Result<u64, CorrelationError> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CorrelationError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| CorrelationError::Closed)?;
        rx.await.map_err(|_| CorrelationError::Closed)
    }
}

/// A reserved slot in the engine queue
pub struct EventPermit<'a> {
    permit: mpsc::Permit<'a, Command>,
}

impl EventPermit<'_> {
    pub fn send(self, event: Arc<CanonicalEvent>) {
        self.permit.send(Command::Event(event));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Initialized,
    Running,
    Stopped,
}

type TaskOutput = (CorrelationEngine, mpsc::Receiver<Command>);

/// Correlation pipeline: engine task lifecycle
pub struct CorrelationService {
    settings: CorrelationSettings,
    state: ServiceState,
    handle: CorrelationHandle,
    sink: Arc<dyn AlertSink>,
    /// Held while the task is not running
    idle: Option<TaskOutput>,
    task: Option<JoinHandle<TaskOutput>>,
}

impl CorrelationService {
    pub fn new(settings: CorrelationSettings, sink: Arc<dyn AlertSink>) -> Self {
        let capacity = settings.event_channel_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let engine = CorrelationEngine::new(settings.clone());
        Self {
            settings,
            state: ServiceState::Initialized,
            handle: CorrelationHandle { tx, capacity },
            sink,
            idle: Some((engine, rx)),
            task: None,
        }
    }

    pub fn handle(&self) -> CorrelationHandle {
        self.handle.clone()
    }

    /// Direct engine access while the task is not running.
    pub fn engine_mut(&mut self) -> Option<&mut CorrelationEngine> {
        self.idle.as_mut().map(|(engine, _)| engine)
    }

    pub fn state_name(&self) -> &'static str {
        match self.state {
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }

    async fn load_rule_dir(&mut self) -> Result<(), CorrelationError> {
        let Some(dir) = self.settings.rule_dir.clone() else {
            return Ok(());
        };
        let rules = RuleLoader::load_directory(&dir, self.settings.limits).await?;
        let Some((engine, _)) = self.idle.as_mut() else {
            return Ok(());
        };
        for rule in rules {
            let id = rule.id.clone();
            match engine.add_rule(rule) {
                Ok(()) => {}
                Err(CorrelationError::TooManyRules { max }) => {
                    return Err(CorrelationError::TooManyRules { max });
                }
                Err(e) => tracing::warn!(rule_id = %id, error = %e, "skipping rule"),
            }
        }
        Ok(())
    }
}

async fn run(
    mut engine: CorrelationEngine,
    mut rx: mpsc::Receiver<Command>,
    sink: Arc<dyn AlertSink>,
) -> TaskOutput {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Event(event) => {
                for alert in engine.evaluate(&event) {
                    sink.on_alert(&alert);
                }
            }
            Command::AddRule { rule, reply } => {
                let _ = reply.send(engine.add_rule(*rule));
            }
            Command::RemoveRule { rule_id, reply } => {
                let _ = reply.send(engine.remove_rule(&rule_id));
            }
            Command::SetEnabled {
                rule_id,
                enabled,
                reply,
            } => {
                let _ = reply.send(engine.set_enabled(&rule_id, enabled));
            }
            Command::Snapshots { reply } => {
                let _ = reply.send(engine.snapshots());
            }
            Command::Chains { reply } => {
                let _ = reply.send(engine.chain_snapshots());
            }
            Command::Flush { reply } => {
                let _ = reply.send(engine.events_evaluated());
            }
            Command::Shutdown => break,
        }
    }
    (engine, rx)
}

impl Pipeline for CorrelationService {
    async fn start(&mut self) -> Result<(), IronstreamError> {
        if self.state == ServiceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.state == ServiceState::Initialized {
            self.load_rule_dir().await?;
        }
        let (engine, rx) = self.idle.take().ok_or_else(|| {
            PipelineError::InitFailed("correlation engine unavailable".to_owned())
        })?;
        let rules = engine.rule_count();
        self.task = Some(tokio::spawn(run(engine, rx, Arc::clone(&self.sink))));
        self.state = ServiceState::Running;
        tracing::info!(
            rules,
            chains = self.settings.chains.len(),
            "correlation engine started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), IronstreamError> {
        if self.state != ServiceState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        // queued events are evaluated before the shutdown marker is reached
        let _ = self.handle.tx.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(output) => self.idle = Some(output),
                Err(e) => {
                    self.state = ServiceState::Stopped;
                    return Err(PipelineError::ChannelRecv(format!(
                        "correlation task failed: {e}"
                    ))
                    .into());
                }
            }
        }
        self.state = ServiceState::Stopped;
        tracing::info!("correlation engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServiceState::Initialized => return HealthStatus::Unhealthy("not started".to_owned()),
            ServiceState::Stopped => return HealthStatus::Unhealthy("stopped".to_owned()),
            ServiceState::Running => {}
        }
        if self.task.as_ref().is_none_or(JoinHandle::is_finished) {
            return HealthStatus::Unhealthy("engine task exited".to_owned());
        }
        let queued = self.handle.queued();
        let capacity = self.handle.capacity();
        if queued as f64 >= capacity as f64 * QUEUE_DEGRADED_RATIO {
            HealthStatus::Degraded(format!("event queue {queued}/{capacity}"))
        } else {
            HealthStatus::Healthy
        }
    }
}
