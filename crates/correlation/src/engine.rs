//! Correlation engine -- rule registry, per-rule state and alert generation.
//!
//! [`CorrelationEngine`] is a plain synchronous state machine. Exactly one owner
//! (the service task) mutates it, so every rule's state is written by a single
//! evaluation path and needs no locking.
//!
//! Per event, each enabled rule goes through:
//! 1. relevance: event type and field conditions
//! 2. techniques: pattern gate, then temporal / entity / statistical state updates
//! 3. combine policy (`all`, `any`, `weighted`)
//! 4. cooldown keyed by the rendered dedup key, in event time

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use ironstream_core::event::CanonicalEvent;
use ironstream_core::metrics as m;
use ironstream_core::types::{Alert, EventRef, Severity};

use crate::chain::{ChainSnapshot, ChainTracker};
use crate::config::CorrelationSettings;
use crate::error::{CorrelationError, RuleEvaluationError};
use crate::rule::{CombinePolicy, CorrelationRule, DedupTemplate, PatternMatcher, RuleMatcher};
use crate::technique::{Baseline, EntityTracker, StatObservation, TemporalWindow, Technique};

/// Per-rule counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleCounters {
    /// Events that passed the relevance filter
    pub matched: u64,
    pub fired: u64,
    /// Satisfied evaluations held back by cooldown
    pub suppressed: u64,
    pub errors: u64,
}

/// Live view of one rule and its state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSnapshot {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub severity: Severity,
    pub techniques: Vec<Technique>,
    pub window_events: usize,
    pub tracked_entities: usize,
    pub evicted_entities: u64,
    pub baseline_samples: usize,
    pub baseline_mean: Option<f64>,
    pub baseline_stddev: Option<f64>,
    pub dedup_keys: usize,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub counters: RuleCounters,
}

/// Mutable state owned by one rule
#[derive(Debug, Clone, Default)]
struct RuleState {
    temporal: Option<TemporalWindow>,
    entity: Option<EntityTracker>,
    baseline: Option<Baseline>,
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl RuleState {
    fn new(rule: &CorrelationRule, settings: &CorrelationSettings) -> Self {
        Self {
            temporal: rule
                .temporal
                .as_ref()
                .map(|spec| TemporalWindow::new(spec, settings.max_window_events)),
            entity: rule
                .entity
                .as_ref()
                .map(|spec| EntityTracker::new(spec, settings.max_entities_per_rule)),
            baseline: rule.statistical.as_ref().map(Baseline::new),
            last_fired: HashMap::new(),
        }
    }
}

/// A registered rule: definition, compiled matchers, state, counters
#[derive(Debug, Clone)]
struct RuleSlot {
    rule: CorrelationRule,
    matcher: RuleMatcher,
    pattern: Option<PatternMatcher>,
    dedup: DedupTemplate,
    cooldown: Duration,
    state: RuleState,
    counters: RuleCounters,
}

impl RuleSlot {
    fn compile(
        rule: CorrelationRule,
        settings: &CorrelationSettings,
    ) -> Result<Self, CorrelationError> {
        rule.validate()?;
        let matcher = RuleMatcher::compile(&rule)?;
        let pattern = rule
            .pattern
            .as_ref()
            .map(|spec| PatternMatcher::compile(&rule.id, spec))
            .transpose()?;
        let dedup = DedupTemplate::parse(&rule.id, &rule.dedup_key)?;
        Ok(Self {
            matcher,
            pattern,
            dedup,
            cooldown: crate::technique::window(rule.cooldown_secs),
            state: RuleState::new(&rule, settings),
            counters: RuleCounters::default(),
            rule,
        })
    }

    fn techniques(&self) -> Vec<Technique> {
        let r = &self.rule;
        [
            (r.temporal.is_some(), Technique::Temporal),
            (r.entity.is_some(), Technique::Entity),
            (r.pattern.is_some(), Technique::Pattern),
            (r.statistical.is_some(), Technique::Statistical),
        ]
        .into_iter()
        .filter_map(|(present, t)| present.then_some(t))
        .collect()
    }

    fn snapshot(&self) -> RuleSnapshot {
        let baseline = self.state.baseline.as_ref();
        RuleSnapshot {
            id: self.rule.id.clone(),
            name: self.rule.name.clone(),
            enabled: self.rule.enabled,
            priority: self.rule.priority,
            severity: self.rule.severity,
            techniques: self.techniques(),
            window_events: self.state.temporal.as_ref().map_or(0, TemporalWindow::len),
            tracked_entities: self.state.entity.as_ref().map_or(0, EntityTracker::tracked),
            evicted_entities: self.state.entity.as_ref().map_or(0, EntityTracker::evicted),
            baseline_samples: baseline.map_or(0, Baseline::len),
            baseline_mean: baseline.filter(|b| !b.is_empty()).map(Baseline::mean),
            baseline_stddev: baseline.filter(|b| !b.is_empty()).map(Baseline::stddev),
            dedup_keys: self.state.last_fired.len(),
            last_fired_at: self.state.last_fired.values().max().copied(),
            counters: self.counters,
        }
    }
}

/// Result of one technique on one event
struct Hit {
    technique: Technique,
    passed: bool,
    detail: String,
}

/// Outcome of evaluating one rule against one event
#[derive(Debug)]
enum Verdict {
    Irrelevant,
    NotSatisfied,
    Suppressed { dedup_key: String },
    Fired(Alert),
}

/// Correlation engine
pub struct CorrelationEngine {
    settings: CorrelationSettings,
    rules: BTreeMap<String, RuleSlot>,
    /// Rule ids by descending priority, then id
    order: Vec<String>,
    chains: ChainTracker,
    events_evaluated: u64,
}

impl CorrelationEngine {
    pub fn new(settings: CorrelationSettings) -> Self {
        let chains = ChainTracker::new(settings.chains.clone(), settings.max_alert_events);
        Self {
            settings,
            rules: BTreeMap::new(),
            order: Vec::new(),
            chains,
            events_evaluated: 0,
        }
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    /// Validates, compiles and registers a rule. State starts empty.
    pub fn add_rule(&mut self, rule: CorrelationRule) -> Result<(), CorrelationError> {
        if self.rules.contains_key(&rule.id) {
            return Err(CorrelationError::DuplicateRule(rule.id));
        }
        if self.rules.len() >= self.settings.limits.max_rules {
            return Err(CorrelationError::TooManyRules {
                max: self.settings.limits.max_rules,
            });
        }
        let slot = RuleSlot::compile(rule, &self.settings)?;
        tracing::info!(
            rule_id = %slot.rule.id,
            priority = slot.rule.priority,
            techniques = ?slot.techniques(),
            "correlation rule registered"
        );
        self.rules.insert(slot.rule.id.clone(), slot);
        self.reorder();
        Ok(())
    }

    /// Removes a rule and tears down its state.
    pub fn remove_rule(&mut self, rule_id: &str) -> Option<CorrelationRule> {
        let slot = self.rules.remove(rule_id)?;
        self.reorder();
        tracing::info!(rule_id, "correlation rule removed");
        Some(slot.rule)
    }

    /// Enables or disables a rule. Disabling discards its state.
    pub fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> Result<(), CorrelationError> {
        let settings = &self.settings;
        let slot = self
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| CorrelationError::UnknownRule(rule_id.to_owned()))?;
        if slot.rule.enabled != enabled {
            slot.rule.enabled = enabled;
            if !enabled {
                slot.state = RuleState::new(&slot.rule, settings);
            }
            tracing::info!(rule_id, enabled, "correlation rule toggled");
        }
        Ok(())
    }

    fn reorder(&mut self) {
        let mut order: Vec<(i32, String)> = self
            .rules
            .values()
            .map(|s| (s.rule.priority, s.rule.id.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        self.order = order.into_iter().map(|(_, id)| id).collect();
        metrics::gauge!(m::CORRELATION_RULES_LOADED).set(self.rules.len() as f64);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, rule_id: &str) -> Option<&CorrelationRule> {
        self.rules.get(rule_id).map(|s| &s.rule)
    }

    /// Rule ids in evaluation order.
    pub fn rule_ids(&self) -> &[String] {
        &self.order
    }

    pub fn snapshot(&self, rule_id: &str) -> Option<RuleSnapshot> {
        self.rules.get(rule_id).map(RuleSlot::snapshot)
    }

    /// Snapshots in evaluation order.
    pub fn snapshots(&self) -> Vec<RuleSnapshot> {
        self.order
            .iter()
            .filter_map(|id| self.rules.get(id))
            .map(RuleSlot::snapshot)
            .collect()
    }

    pub fn chain_snapshots(&self) -> Vec<ChainSnapshot> {
        self.chains.snapshots()
    }

    pub fn events_evaluated(&self) -> u64 {
        self.events_evaluated
    }

    /// Evaluates every enabled rule against `event`.
    ///
    /// Returns the fired alerts in rule evaluation order, followed by any attack-chain
    /// alerts they complete. A rule that fails is logged and counted; the others
    /// still run.
    pub fn evaluate(&mut self, event: &CanonicalEvent) -> Vec<Alert> {
        let started = Instant::now();
        self.events_evaluated += 1;
        metrics::counter!(m::CORRELATION_EVENTS_EVALUATED_TOTAL).increment(1);

        let max_events = self.settings.max_alert_events;
        let mut alerts = Vec::new();
        for id in &self.order {
            let Some(slot) = self.rules.get_mut(id) else {
                continue;
            };
            if !slot.rule.enabled {
                continue;
            }
            match evaluate_rule(slot, event, max_events) {
                Ok(Verdict::Fired(alert)) => {
                    slot.counters.fired += 1;
                    metrics::counter!(
                        m::CORRELATION_ALERTS_TOTAL,
                        m::LABEL_RULE => slot.rule.id.clone(),
                        m::LABEL_SEVERITY => alert.severity.as_str()
                    )
                    .increment(1);
                    tracing::debug!(
                        rule_id = %slot.rule.id,
                        dedup_key = %alert.dedup_key,
                        "correlation rule fired"
                    );
                    alerts.push(alert);
                }
                Ok(Verdict::Suppressed { dedup_key }) => {
                    slot.counters.suppressed += 1;
                    metrics::counter!(
                        m::CORRELATION_ALERTS_SUPPRESSED_TOTAL,
                        m::LABEL_RULE => slot.rule.id.clone()
                    )
                    .increment(1);
                    tracing::trace!(rule_id = %slot.rule.id, %dedup_key, "alert suppressed by cooldown");
                }
                Ok(Verdict::Irrelevant | Verdict::NotSatisfied) => {}
                Err(e) => {
                    slot.counters.errors += 1;
                    metrics::counter!(
                        m::CORRELATION_RULE_ERRORS_TOTAL,
                        m::LABEL_RULE => slot.rule.id.clone()
                    )
                    .increment(1);
                    tracing::warn!(error = %e, "rule evaluation failed");
                }
            }
        }

        if !self.chains.is_empty() {
            let mut composites = Vec::new();
            for alert in &alerts {
                for composite in self.chains.observe(alert) {
                    metrics::counter!(
                        m::CORRELATION_CHAIN_ALERTS_TOTAL,
                        m::LABEL_RULE => composite.rule_id.clone()
                    )
                    .increment(1);
                    tracing::info!(
                        chain = %composite.rule_id,
                        severity = %composite.severity,
                        "attack chain completed"
                    );
                    composites.push(composite);
                }
            }
            alerts.extend(composites);
        }

        metrics::histogram!(m::CORRELATION_EVALUATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        alerts
    }
}

fn evaluate_rule(
    slot: &mut RuleSlot,
    event: &CanonicalEvent,
    max_events: usize,
) -> Result<Verdict, RuleEvaluationError> {
    if !slot.matcher.matches(event) {
        return Ok(Verdict::Irrelevant);
    }
    slot.counters.matched += 1;

    let policy = slot.rule.combine;
    let pattern_passed = slot.pattern.as_ref().map(|p| p.matches(event));
    // under `all`, only pattern-qualifying events may enter the stateful windows
    if policy == CombinePolicy::All && pattern_passed == Some(false) {
        return Ok(Verdict::NotSatisfied);
    }

    // parse before any state is touched, so a bad event leaves the rule unchanged
    let stat_value = match &slot.rule.statistical {
        Some(spec) => numeric_field(event, &spec.field).map_err(|reason| RuleEvaluationError {
            rule_id: slot.rule.id.clone(),
            event_id: event.id().to_owned(),
            reason,
        })?,
        None => None,
    };

    let mut hits: Vec<Hit> = Vec::with_capacity(4);
    let mut evidence: Vec<EventRef> = Vec::new();

    if let Some(passed) = pattern_passed {
        hits.push(Hit {
            technique: Technique::Pattern,
            passed,
            detail: "message pattern matched".to_owned(),
        });
    }

    if let Some(window) = slot.state.temporal.as_mut() {
        let passed = window.observe(event.event_ref());
        if passed {
            evidence.extend(window.events().cloned());
        }
        hits.push(Hit {
            technique: Technique::Temporal,
            passed,
            detail: window.describe(),
        });
    }

    if let Some(tracker) = slot.state.entity.as_mut() {
        let hit = match tracker.observe(event) {
            Some(obs) => {
                if obs.satisfied {
                    evidence.extend(tracker.events(&obs.entity).cloned());
                }
                Hit {
                    technique: Technique::Entity,
                    passed: obs.satisfied,
                    detail: tracker.describe(&obs),
                }
            }
            None => Hit {
                technique: Technique::Entity,
                passed: false,
                detail: String::new(),
            },
        };
        hits.push(hit);
    }

    if let (Some(baseline), Some(spec)) = (slot.state.baseline.as_mut(), &slot.rule.statistical) {
        let obs = match stat_value {
            Some(value) => baseline.observe(event.timestamp(), value),
            None => StatObservation {
                value: f64::NAN,
                anomaly: None,
            },
        };
        hits.push(Hit {
            technique: Technique::Statistical,
            passed: obs.anomaly.is_some(),
            detail: Baseline::describe(&spec.field, &obs),
        });
    }

    let satisfied = match policy {
        CombinePolicy::All => hits.iter().all(|h| h.passed),
        CombinePolicy::Any => hits.is_empty() || hits.iter().any(|h| h.passed),
        CombinePolicy::Weighted => {
            let score: f64 = hits
                .iter()
                .filter(|h| h.passed)
                .map(|h| technique_weight(&slot.rule, h.technique))
                .sum();
            score >= slot.rule.min_score.unwrap_or(f64::INFINITY)
        }
    };
    if !satisfied {
        return Ok(Verdict::NotSatisfied);
    }

    let dedup_key = slot.dedup.render(event, &slot.rule.id);
    let now = event.timestamp();
    if let Some(last) = slot.state.last_fired.get(&dedup_key) {
        if now - *last < slot.cooldown {
            return Ok(Verdict::Suppressed { dedup_key });
        }
    }
    let cooldown = slot.cooldown;
    slot.state
        .last_fired
        .retain(|_, fired_at| now - *fired_at < cooldown);
    slot.state.last_fired.insert(dedup_key.clone(), now);

    evidence.push(event.event_ref());
    Ok(Verdict::Fired(build_alert(
        &slot.rule, event, &hits, evidence, dedup_key, max_events,
    )))
}

fn numeric_field(event: &CanonicalEvent, field: &str) -> Result<Option<f64>, String> {
    let Some(raw) = event.field(field) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(format!("field '{field}' is not a finite number: '{raw}'")),
    }
}

fn technique_weight(rule: &CorrelationRule, technique: Technique) -> f64 {
    match technique {
        Technique::Temporal => rule.temporal.as_ref().map_or(0.0, |s| s.weight),
        Technique::Entity => rule.entity.as_ref().map_or(0.0, |s| s.weight),
        Technique::Pattern => rule.pattern.as_ref().map_or(0.0, |s| s.weight),
        Technique::Statistical => rule.statistical.as_ref().map_or(0.0, |s| s.weight),
    }
}

fn build_alert(
    rule: &CorrelationRule,
    event: &CanonicalEvent,
    hits: &[Hit],
    mut evidence: Vec<EventRef>,
    dedup_key: String,
    max_events: usize,
) -> Alert {
    evidence.sort_by_key(|e| e.timestamp);
    let mut seen = std::collections::HashSet::new();
    evidence.retain(|e| seen.insert(e.event_id.clone()));
    if evidence.len() > max_events {
        evidence.drain(..evidence.len() - max_events);
    }

    let details: Vec<&str> = hits
        .iter()
        .filter(|h| h.passed && !h.detail.is_empty())
        .map(|h| h.detail.as_str())
        .collect();
    let message = if details.is_empty() {
        format!("{}: matched {} event", rule.name, event.event_type())
    } else {
        format!("{}: {}", rule.name, details.join("; "))
    };

    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: rule.severity,
        timestamp: event.timestamp(),
        events: evidence,
        message,
        dedup_key,
        mitre_technique: rule.mitre_technique.clone(),
        recommended_actions: rule.recommended_actions.clone(),
        composite: false,
    }
}
