//! Submission and administrative front end shared by the orchestrator and ingest
//! connections.

use std::sync::Arc;

use ironstream_core::error::IronstreamError;
use ironstream_core::event::CanonicalEvent;
use ironstream_core::metrics as m;
use ironstream_correlation::{
    ChainSnapshot, CorrelationError, CorrelationHandle, CorrelationRule, RuleSnapshot,
};
use ironstream_normalizer::Normalizer;
use ironstream_stream::{DestinationHealth, DestinationSettings, ShutdownReport, StreamManager};

use crate::submission::{RejectReason, SubmitOutcome};

/// Cheap clonable handle over the normalizer, the stream manager and the
/// correlation queue.
#[derive(Clone)]
pub struct IronstreamHandle {
    normalizer: Arc<Normalizer>,
    stream: StreamManager,
    correlation: Option<CorrelationHandle>,
}

impl std::fmt::Debug for IronstreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IronstreamHandle")
            .field("stream", &self.stream)
            .field("correlation", &self.correlation.is_some())
            .finish()
    }
}

impl IronstreamHandle {
    pub fn new(
        normalizer: Arc<Normalizer>,
        stream: StreamManager,
        correlation: Option<CorrelationHandle>,
    ) -> Self {
        Self {
            normalizer,
            stream,
            correlation,
        }
    }

    /// Normalizes one raw event and fans it out.
    pub async fn submit(&self, raw: &[u8]) -> SubmitOutcome {
        match self.normalizer.normalize(raw) {
            Ok(event) => self.submit_event(Arc::new(event)).await,
            Err(e) => {
                tracing::warn!(error = %e, size = raw.len(), "submission rejected");
                reject(RejectReason::from(&e))
            }
        }
    }

    /// Fans an already-normalized event out to the destinations and the engine.
    ///
    /// The correlation slot is reserved first and committed only when the stream
    /// side admits the event, so a rejected submission leaves no trace in either
    /// pipeline and can be retried as is.
    pub async fn submit_event(&self, event: Arc<CanonicalEvent>) -> SubmitOutcome {
        let permit = match &self.correlation {
            Some(correlation) => match correlation.try_reserve() {
                Ok(permit) => Some(permit),
                Err(CorrelationError::Closed) => {
                    tracing::warn!(event_id = event.id(), "correlation engine gone, skipping");
                    None
                }
                Err(e) => return reject(RejectReason::Backpressure(e.to_string())),
            },
            None => None,
        };

        let report = self.stream.dispatch(Arc::clone(&event)).await;
        if report.is_backpressured() {
            let detail = report
                .backpressure()
                .map(ToString::to_string)
                .unwrap_or_else(|| "destination buffers full".to_owned());
            return reject(RejectReason::Backpressure(detail));
        }

        if let Some(permit) = permit {
            permit.send(Arc::clone(&event));
        }
        metrics::counter!(m::DAEMON_SUBMISSIONS_TOTAL, m::LABEL_RESULT => "accepted")
            .increment(1);
        SubmitOutcome::Accepted {
            event_id: event.id().to_owned(),
            destinations: report.accepted(),
        }
    }

    pub fn stream(&self) -> &StreamManager {
        &self.stream
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn correlation_enabled(&self) -> bool {
        self.correlation.is_some()
    }

    // ─── destinations ──────────────────────────────────────────────

    pub async fn register_destination(
        &self,
        settings: DestinationSettings,
    ) -> Result<(), IronstreamError> {
        let id = settings.id.clone();
        self.stream.register(settings).await?;
        tracing::info!(destination = %id, "destination registered");
        Ok(())
    }

    pub async fn set_destination_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<(), IronstreamError> {
        self.stream.set_enabled(id, enabled).await?;
        tracing::info!(destination = id, enabled, "destination toggled");
        Ok(())
    }

    /// Removes a destination after a final flush; undelivered events come back.
    pub async fn delete_destination(&self, id: &str) -> Result<ShutdownReport, IronstreamError> {
        Ok(self.stream.delete(id).await?)
    }

    pub async fn destination_health(&self, id: &str) -> Result<DestinationHealth, IronstreamError> {
        Ok(self.stream.health(id).await?)
    }

    pub async fn destinations_health(&self) -> Vec<DestinationHealth> {
        self.stream.health_all().await
    }

    // ─── rules ─────────────────────────────────────────────────────

    pub async fn add_rule(&self, rule: CorrelationRule) -> Result<(), IronstreamError> {
        let id = rule.id.clone();
        self.correlation()?.add_rule(rule).await?;
        tracing::info!(rule_id = %id, "rule registered");
        Ok(())
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<(), IronstreamError> {
        self.correlation()?.set_enabled(id, enabled).await?;
        tracing::info!(rule_id = id, enabled, "rule toggled");
        Ok(())
    }

    pub async fn delete_rule(&self, id: &str) -> Result<CorrelationRule, IronstreamError> {
        let rule = self.correlation()?.remove_rule(id).await?;
        tracing::info!(rule_id = id, "rule deleted");
        Ok(rule)
    }

    pub async fn rule_snapshot(&self, id: &str) -> Result<RuleSnapshot, IronstreamError> {
        Ok(self.correlation()?.snapshot(id).await?)
    }

    /// Rule snapshots in evaluation order; empty when correlation is disabled.
    pub async fn rule_snapshots(&self) -> Result<Vec<RuleSnapshot>, IronstreamError> {
        match &self.correlation {
            Some(correlation) => Ok(correlation.snapshots().await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn chain_snapshots(&self) -> Result<Vec<ChainSnapshot>, IronstreamError> {
        match &self.correlation {
            Some(correlation) => Ok(correlation.chain_snapshots().await?),
            None => Ok(Vec::new()),
        }
    }

    /// Waits until every accepted event has been evaluated by the engine.
    pub async fn flush_correlation(&self) -> Result<u64, IronstreamError> {
        match &self.correlation {
            Some(correlation) => Ok(correlation.flush().await?),
            None => Ok(0),
        }
    }

    fn correlation(&self) -> Result<&CorrelationHandle, IronstreamError> {
        self.correlation
            .as_ref()
            .ok_or_else(|| IronstreamError::Correlation("correlation engine is disabled".to_owned()))
    }
}

fn reject(reason: RejectReason) -> SubmitOutcome {
    metrics::counter!(
        m::DAEMON_SUBMISSIONS_TOTAL,
        m::LABEL_RESULT => "rejected",
        m::LABEL_REASON => reason.code()
    )
    .increment(1);
    SubmitOutcome::Rejected(reason)
}
