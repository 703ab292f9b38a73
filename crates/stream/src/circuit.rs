//! Per-destination circuit breaker
//!
//! - **Closed**: deliveries pass; `threshold` consecutive failures open the circuit.
//! - **Open**: no delivery attempts until `until`; buffering continues.
//! - **HalfOpen**: exactly one trial batch. Success closes, failure reopens with a
//!   fresh cooldown.
//!
//! Every transition takes `now` explicitly so the state machine is driven by the
//! destination task's clock (paused tokio time in tests).

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Circuit state as reported in health snapshots and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitKind {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitKind {
    /// Gauge value exported as `ironstream_stream_circuit_state`.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: State,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: State::Closed {
                consecutive_failures: 0,
            },
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Asks whether a delivery attempt may start now.
    ///
    /// An expired open circuit moves to half-open and grants the single trial.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            State::Closed { .. } => true,
            State::Open { until } if now >= until => {
                self.state = State::HalfOpen {
                    trial_in_flight: true,
                };
                tracing::info!("circuit half-open, allowing trial delivery");
                true
            }
            State::Open { .. } => false,
            State::HalfOpen { trial_in_flight } => {
                if trial_in_flight {
                    false
                } else {
                    self.state = State::HalfOpen {
                        trial_in_flight: true,
                    };
                    true
                }
            }
        }
    }

    pub fn on_success(&mut self) {
        if matches!(self.state, State::HalfOpen { .. }) {
            tracing::info!("trial delivery succeeded, circuit closed");
        }
        self.state = State::Closed {
            consecutive_failures: 0,
        };
    }

    /// Records a failed attempt. Returns `true` when this failure opened the circuit.
    pub fn on_failure(&mut self, now: Instant) -> bool {
        match self.state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.threshold {
                    self.open(now);
                    true
                } else {
                    self.state = State::Closed {
                        consecutive_failures: failures,
                    };
                    false
                }
            }
            State::HalfOpen { .. } => {
                self.open(now);
                true
            }
            // a late result from before the circuit opened
            State::Open { .. } => false,
        }
    }

    fn open(&mut self, now: Instant) {
        let until = now + self.cooldown;
        tracing::warn!(
            cooldown_ms = self.cooldown.as_millis() as u64,
            "circuit opened"
        );
        self.state = State::Open { until };
    }

    /// When an open circuit will admit its trial.
    pub fn open_until(&self) -> Option<Instant> {
        match self.state {
            State::Open { until } => Some(until),
            _ => None,
        }
    }

    pub fn kind(&self) -> CircuitKind {
        match self.state {
            State::Closed { .. } => CircuitKind::Closed,
            State::Open { .. } => CircuitKind::Open,
            State::HalfOpen { .. } => CircuitKind::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.state {
            State::Closed {
                consecutive_failures,
            } => consecutive_failures,
            _ => self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(30);

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let mut cb = CircuitBreaker::new(3, COOLDOWN);
        let now = Instant::now();
        assert!(!cb.on_failure(now));
        assert!(!cb.on_failure(now));
        assert_eq!(cb.consecutive_failures(), 2);
        assert!(cb.on_failure(now));
        assert_eq!(cb.kind(), CircuitKind::Open);
        assert!(!cb.allow(now));
        assert!(!cb.allow(now + COOLDOWN - Duration::from_millis(1)));
    }

    #[test]
    fn success_resets_failure_count() {
        let mut cb = CircuitBreaker::new(3, COOLDOWN);
        let now = Instant::now();
        cb.on_failure(now);
        cb.on_failure(now);
        cb.on_success();
        assert!(!cb.on_failure(now));
        assert_eq!(cb.kind(), CircuitKind::Closed);
    }

    #[test]
    fn half_open_allows_exactly_one_trial() {
        let mut cb = CircuitBreaker::new(1, COOLDOWN);
        let now = Instant::now();
        cb.on_failure(now);
        let later = now + COOLDOWN;
        assert!(cb.allow(later));
        assert_eq!(cb.kind(), CircuitKind::HalfOpen);
        assert!(!cb.allow(later));

        cb.on_success();
        assert_eq!(cb.kind(), CircuitKind::Closed);
        assert!(cb.allow(later));
    }

    #[test]
    fn failed_trial_reopens_with_fresh_cooldown() {
        let mut cb = CircuitBreaker::new(1, COOLDOWN);
        let t0 = Instant::now();
        cb.on_failure(t0);
        let t1 = t0 + COOLDOWN + Duration::from_secs(5);
        assert!(cb.allow(t1));
        assert!(cb.on_failure(t1));
        assert_eq!(cb.open_until(), Some(t1 + COOLDOWN));
        assert!(!cb.allow(t1 + COOLDOWN - Duration::from_secs(1)));
    }

    #[test]
    fn gauge_values() {
        assert_eq!(CircuitKind::Closed.gauge_value(), 0.0);
        assert_eq!(CircuitKind::Open.gauge_value(), 1.0);
        assert_eq!(CircuitKind::HalfOpen.gauge_value(), 2.0);
    }
}
