//! Aggregated daemon health.
//!
//! The overall status is the worst status among enabled components:
//!
//! - all healthy -> `Healthy`
//! - any degraded, none unhealthy -> `Degraded(reasons)`
//! - any unhealthy -> `Unhealthy(reasons)`

use serde::Serialize;

use ironstream_core::pipeline::HealthStatus;
use ironstream_correlation::RuleSnapshot;
use ironstream_stream::DestinationHealth;

/// Health report for the whole daemon
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Worst status among enabled components
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
    /// Per-destination circuit state, dead-letter size and counters
    pub destinations: Vec<DestinationHealth>,
    /// Per-rule counters and technique state
    pub rules: Vec<RuleSnapshot>,
}

/// Status of one component (`stream`, `correlation`, `ingest`)
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub enabled: bool,
    pub status: HealthStatus,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, enabled: bool, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            enabled,
            status,
        }
    }
}

/// Worst status among enabled components, with every non-healthy reason.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components.iter().filter(|c| c.enabled) {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", component.name, reason));
                worst = worst.worst(component.status.clone());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str, enabled: bool, status: HealthStatus) -> ComponentHealth {
        ComponentHealth::new(name, enabled, status)
    }

    #[test]
    fn all_healthy() {
        let components = vec![
            component("stream", true, HealthStatus::Healthy),
            component("correlation", true, HealthStatus::Healthy),
        ];
        assert_eq!(aggregate_status(&components), HealthStatus::Healthy);
    }

    #[test]
    fn empty_is_healthy() {
        assert_eq!(aggregate_status(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn degraded_collects_reasons() {
        let components = vec![
            component("stream", true, HealthStatus::Degraded("siem half-open".to_owned())),
            component("correlation", true, HealthStatus::Healthy),
        ];
        assert_eq!(
            aggregate_status(&components),
            HealthStatus::Degraded("stream: siem half-open".to_owned())
        );
    }

    #[test]
    fn unhealthy_wins_and_keeps_every_reason() {
        let components = vec![
            component("stream", true, HealthStatus::Degraded("slow".to_owned())),
            component("correlation", true, HealthStatus::Unhealthy("stopped".to_owned())),
        ];
        assert_eq!(
            aggregate_status(&components),
            HealthStatus::Unhealthy("stream: slow; correlation: stopped".to_owned())
        );
    }

    #[test]
    fn disabled_components_are_ignored() {
        let components = vec![
            component("stream", true, HealthStatus::Healthy),
            component("ingest", false, HealthStatus::Unhealthy("not running".to_owned())),
        ];
        assert_eq!(aggregate_status(&components), HealthStatus::Healthy);
    }

    #[test]
    fn serializes_for_the_health_endpoint() {
        let health = DaemonHealth {
            status: HealthStatus::Healthy,
            uptime_secs: 5,
            components: vec![component("stream", true, HealthStatus::Healthy)],
            destinations: Vec::new(),
            rules: Vec::new(),
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"]["status"], "healthy");
        assert_eq!(json["components"][0]["name"], "stream");
    }
}
