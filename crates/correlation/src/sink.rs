//! Alert sinks -- where fired alerts go.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ironstream_core::types::{Alert, Severity};
use tokio::sync::mpsc;

/// Receives every alert the engine fires, composite alerts included.
///
/// Called from the engine task; implementations must not block.
pub trait AlertSink: Send + Sync + 'static {
    fn on_alert(&self, alert: &Alert);
}

/// Forwards alerts into a bounded channel.
///
/// A full or closed channel never stalls evaluation; the alert is logged at
/// `error` level with its id and counted instead.
pub struct ChannelAlertSink {
    tx: mpsc::Sender<Alert>,
    dropped: AtomicU64,
}

impl ChannelAlertSink {
    pub fn new(tx: mpsc::Sender<Alert>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Creates the sink together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Alerts that could not be forwarded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AlertSink for ChannelAlertSink {
    fn on_alert(&self, alert: &Alert) {
        if let Err(e) = self.tx.try_send(alert.clone()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "alert channel full",
                mpsc::error::TrySendError::Closed(_) => "alert channel closed",
            };
            tracing::error!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                severity = %alert.severity,
                dedup_key = %alert.dedup_key,
                reason,
                "alert not forwarded"
            );
        }
    }
}

/// Logs every alert as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn on_alert(&self, alert: &Alert) {
        let events = alert.events.len();
        let mitre = alert.mitre_technique.as_deref().unwrap_or("-");
        match alert.severity {
            Severity::High | Severity::Critical => tracing::warn!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                severity = %alert.severity,
                dedup_key = %alert.dedup_key,
                mitre,
                events,
                composite = alert.composite,
                "{}",
                alert.message
            ),
            Severity::Low | Severity::Medium => tracing::info!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                severity = %alert.severity,
                dedup_key = %alert.dedup_key,
                mitre,
                events,
                composite = alert.composite,
                "{}",
                alert.message
            ),
        }
    }
}

/// Sends each alert to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutAlertSink {
    fn on_alert(&self, alert: &Alert) {
        for sink in &self.sinks {
            sink.on_alert(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_owned(),
            rule_id: "r".to_owned(),
            rule_name: "R".to_owned(),
            severity: Severity::High,
            timestamp: Utc::now(),
            events: Vec::new(),
            message: "test".to_owned(),
            dedup_key: "r".to_owned(),
            mitre_technique: None,
            recommended_actions: Vec::new(),
            composite: false,
        }
    }

    #[test]
    fn channel_sink_forwards_and_counts_overflow() {
        let (sink, mut rx) = ChannelAlertSink::channel(1);
        sink.on_alert(&alert("a1"));
        sink.on_alert(&alert("a2"));
        assert_eq!(rx.try_recv().unwrap().id, "a1");
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelAlertSink::channel(4);
        drop(rx);
        sink.on_alert(&alert("a1"));
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelAlertSink::channel(4);
        let (b, mut rx_b) = ChannelAlertSink::channel(4);
        let fanout = FanoutAlertSink::new()
            .with(Arc::new(TracingAlertSink))
            .with(Arc::new(a))
            .with(Arc::new(b));
        assert_eq!(fanout.len(), 3);
        fanout.on_alert(&alert("x"));
        assert_eq!(rx_a.try_recv().unwrap().id, "x");
        assert_eq!(rx_b.try_recv().unwrap().id, "x");
    }
}
