//! Attack-chain detection over rule alerts.
//!
//! A chain is an ordered list of rule ids. When their alerts arrive in that order,
//! each within its stage's time budget of the previous one, the tracker emits one
//! composite alert. An expired budget resets the chain.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use ironstream_core::config::ChainConfig;
use ironstream_core::types::{Alert, EventRef, Severity};
use serde::Serialize;

use crate::error::CorrelationError;

/// One stage of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStage {
    pub rule_id: String,
    /// Budget since the previous stage; unused for the first stage
    pub max_gap: Duration,
}

/// Parsed attack chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub id: String,
    pub name: String,
    /// Fixed severity; `None` means one level above the highest stage alert
    pub severity: Option<Severity>,
    pub mitre_technique: Option<String>,
    pub stages: Vec<ChainStage>,
}

impl ChainSpec {
    pub fn from_config(config: &ChainConfig) -> Result<Self, CorrelationError> {
        let invalid = |reason: String| CorrelationError::InvalidChain {
            chain_id: config.id.clone(),
            reason,
        };
        if config.stages.len() < 2 {
            return Err(invalid("needs at least 2 stages".to_owned()));
        }
        let severity = match &config.severity {
            Some(s) => Some(
                Severity::from_str_loose(s).ok_or_else(|| invalid(format!("unknown severity '{s}'")))?,
            ),
            None => None,
        };
        let stages = config
            .stages
            .iter()
            .map(|s| ChainStage {
                rule_id: s.rule_id.clone(),
                max_gap: crate::technique::window(s.max_gap_secs),
            })
            .collect();
        Ok(Self {
            id: config.id.clone(),
            name: if config.name.trim().is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            severity,
            mitre_technique: config.mitre_technique.clone(),
            stages,
        })
    }
}

#[derive(Debug, Clone)]
struct Progress {
    /// Index of the stage waiting to fire
    next: usize,
    last_at: DateTime<Utc>,
    max_severity: Severity,
    events: Vec<EventRef>,
    actions: Vec<String>,
}

impl Progress {
    fn start(alert: &Alert) -> Self {
        let mut p = Self {
            next: 0,
            last_at: alert.timestamp,
            max_severity: alert.severity,
            events: Vec::new(),
            actions: Vec::new(),
        };
        p.absorb(alert);
        p
    }

    fn absorb(&mut self, alert: &Alert) {
        self.next += 1;
        self.last_at = alert.timestamp;
        self.max_severity = self.max_severity.max(alert.severity);
        self.events.extend(alert.events.iter().cloned());
        for action in &alert.recommended_actions {
            if !self.actions.contains(action) {
                self.actions.push(action.clone());
            }
        }
    }
}

/// Live progress of one chain, for snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSnapshot {
    pub id: String,
    pub stages: usize,
    pub completed_stages: usize,
    pub fired: u64,
}

#[derive(Debug, Clone)]
struct ChainState {
    spec: ChainSpec,
    progress: Option<Progress>,
    fired: u64,
}

/// Tracks every configured chain
#[derive(Debug, Clone, Default)]
pub struct ChainTracker {
    chains: Vec<ChainState>,
    max_alert_events: usize,
}

impl ChainTracker {
    pub fn new(specs: Vec<ChainSpec>, max_alert_events: usize) -> Self {
        Self {
            chains: specs
                .into_iter()
                .map(|spec| ChainState {
                    spec,
                    progress: None,
                    fired: 0,
                })
                .collect(),
            max_alert_events: max_alert_events.max(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Feeds one rule alert; returns the composite alerts it completes.
    pub fn observe(&mut self, alert: &Alert) -> Vec<Alert> {
        if alert.composite {
            return Vec::new();
        }
        let mut out = Vec::new();
        for chain in &mut self.chains {
            let stages = &chain.spec.stages;
            let mut progress = chain.progress.take();

            if let Some(p) = &progress {
                let gap = alert.timestamp - p.last_at;
                if gap > stages[p.next].max_gap {
                    tracing::debug!(
                        chain = %chain.spec.id,
                        stage = p.next,
                        "attack chain stage budget expired, resetting"
                    );
                    progress = None;
                }
            }

            chain.progress = match progress {
                Some(mut p) if stages[p.next].rule_id == alert.rule_id => {
                    p.absorb(alert);
                    if p.next == stages.len() {
                        chain.fired += 1;
                        out.push(composite(&chain.spec, p, alert, self.max_alert_events));
                        None
                    } else {
                        Some(p)
                    }
                }
                // a repeated first stage restarts the clock
                Some(p) if p.next == 1 && stages[0].rule_id == alert.rule_id => {
                    Some(Progress::start(alert))
                }
                Some(p) => Some(p),
                None if stages[0].rule_id == alert.rule_id => Some(Progress::start(alert)),
                None => None,
            };
        }
        out
    }

    pub fn snapshots(&self) -> Vec<ChainSnapshot> {
        self.chains
            .iter()
            .map(|c| ChainSnapshot {
                id: c.spec.id.clone(),
                stages: c.spec.stages.len(),
                completed_stages: c.progress.as_ref().map_or(0, |p| p.next),
                fired: c.fired,
            })
            .collect()
    }
}

fn composite(spec: &ChainSpec, progress: Progress, last: &Alert, max_events: usize) -> Alert {
    let mut events = progress.events;
    events.sort_by_key(|e| e.timestamp);
    let mut seen = HashSet::new();
    events.retain(|e| seen.insert(e.event_id.clone()));
    if events.len() > max_events {
        events.drain(..events.len() - max_events);
    }
    let path = spec
        .stages
        .iter()
        .map(|s| s.rule_id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");

    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        rule_id: spec.id.clone(),
        rule_name: spec.name.clone(),
        severity: spec
            .severity
            .unwrap_or_else(|| progress.max_severity.escalate()),
        timestamp: last.timestamp,
        events,
        message: format!("{}: attack chain {path} completed", spec.name),
        dedup_key: spec.id.clone(),
        mitre_technique: spec.mitre_technique.clone(),
        recommended_actions: progress.actions,
        composite: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(gap_secs: i64) -> ChainSpec {
        ChainSpec {
            id: "intrusion".to_owned(),
            name: "Intrusion".to_owned(),
            severity: None,
            mitre_technique: Some("TA0001".to_owned()),
            stages: ["recon", "brute", "exfil"]
                .iter()
                .map(|r| ChainStage {
                    rule_id: (*r).to_owned(),
                    max_gap: Duration::seconds(gap_secs),
                })
                .collect(),
        }
    }

    fn alert(rule: &str, secs: i64, severity: Severity) -> Alert {
        let ts = DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap();
        Alert {
            id: format!("a-{rule}-{secs}"),
            rule_id: rule.to_owned(),
            rule_name: rule.to_owned(),
            severity,
            timestamp: ts,
            events: vec![EventRef {
                event_id: format!("e-{rule}-{secs}"),
                timestamp: ts,
                event_type: rule.to_owned(),
            }],
            message: String::new(),
            dedup_key: rule.to_owned(),
            mitre_technique: None,
            recommended_actions: vec![format!("check {rule}")],
            composite: false,
        }
    }

    #[test]
    fn in_order_within_budget_fires_once() {
        let mut t = ChainTracker::new(vec![spec(600)], 20);
        assert!(t.observe(&alert("recon", 0, Severity::Low)).is_empty());
        assert!(t.observe(&alert("unrelated", 10, Severity::High)).is_empty());
        assert!(t.observe(&alert("brute", 100, Severity::High)).is_empty());
        let out = t.observe(&alert("exfil", 500, Severity::Medium));
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert!(c.composite);
        assert_eq!(c.rule_id, "intrusion");
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.events.len(), 3);
        assert_eq!(c.mitre_technique.as_deref(), Some("TA0001"));
        assert_eq!(c.recommended_actions.len(), 3);
        assert_eq!(t.snapshots()[0].completed_stages, 0);
        assert_eq!(t.snapshots()[0].fired, 1);
    }

    #[test]
    fn shared_evidence_appears_once() {
        let mut t = ChainTracker::new(vec![spec(600)], 20);
        let shared = EventRef {
            event_id: "e-shared".to_owned(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            event_type: "auth".to_owned(),
        };
        let mut recon = alert("recon", 0, Severity::Low);
        recon.events.push(shared.clone());
        let mut brute = alert("brute", 0, Severity::High);
        brute.events.push(shared);
        t.observe(&recon);
        t.observe(&brute);
        let out = t.observe(&alert("exfil", 10, Severity::Medium));
        assert_eq!(out.len(), 1);
        let ids: Vec<&str> = out[0].events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids.iter().filter(|id| **id == "e-shared").count(), 1);
    }

    #[test]
    fn out_of_order_does_not_fire() {
        let mut t = ChainTracker::new(vec![spec(600)], 20);
        assert!(t.observe(&alert("brute", 0, Severity::High)).is_empty());
        assert!(t.observe(&alert("recon", 1, Severity::Low)).is_empty());
        assert!(t.observe(&alert("exfil", 2, Severity::High)).is_empty());
        assert_eq!(t.snapshots()[0].completed_stages, 1);
    }

    #[test]
    fn expired_budget_resets() {
        let mut t = ChainTracker::new(vec![spec(60)], 20);
        t.observe(&alert("recon", 0, Severity::Low));
        t.observe(&alert("brute", 30, Severity::High));
        assert_eq!(t.snapshots()[0].completed_stages, 2);
        assert!(t.observe(&alert("exfil", 200, Severity::High)).is_empty());
        assert_eq!(t.snapshots()[0].completed_stages, 0);
    }

    #[test]
    fn repeated_first_stage_restarts_clock() {
        let mut t = ChainTracker::new(vec![spec(60)], 20);
        t.observe(&alert("recon", 0, Severity::Low));
        t.observe(&alert("recon", 100, Severity::Low));
        t.observe(&alert("brute", 150, Severity::Medium));
        let out = t.observe(&alert("exfil", 200, Severity::Medium));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::High);
    }

    #[test]
    fn composite_alerts_are_ignored() {
        let mut t = ChainTracker::new(vec![spec(60)], 20);
        let mut a = alert("recon", 0, Severity::Low);
        a.composite = true;
        t.observe(&a);
        assert_eq!(t.snapshots()[0].completed_stages, 0);
    }

    #[test]
    fn from_config_rejects_unknown_severity() {
        let config = ChainConfig {
            id: "c".to_owned(),
            name: String::new(),
            severity: Some("urgent".to_owned()),
            mitre_technique: None,
            stages: vec![
                ironstream_core::config::ChainStageConfig {
                    rule_id: "a".to_owned(),
                    max_gap_secs: 0,
                },
                ironstream_core::config::ChainStageConfig {
                    rule_id: "b".to_owned(),
                    max_gap_secs: 10,
                },
            ],
        };
        assert!(ChainSpec::from_config(&config).is_err());
        let ok = ChainSpec::from_config(&ChainConfig {
            severity: None,
            ..config
        })
        .unwrap();
        assert_eq!(ok.name, "c");
        assert_eq!(ok.stages[1].max_gap, Duration::seconds(10));
    }
}
