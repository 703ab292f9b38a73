//! Sampling policies.
//!
//! A destination either keeps a uniform fraction of events or uses a per-severity
//! table (unlisted severities fall back to the default rate). Rates of `1.0` and
//! `0.0` short-circuit without drawing a random number.

use std::collections::BTreeMap;

use ironstream_core::types::Severity;
use rand::Rng;

use crate::error::StreamError;

#[derive(Debug, Clone, PartialEq)]
pub enum SamplingPolicy {
    Uniform(f64),
    Stratified {
        default_rate: f64,
        by_severity: BTreeMap<Severity, f64>,
    },
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::Uniform(1.0)
    }
}

impl SamplingPolicy {
    /// Builds the policy from destination config values.
    ///
    /// An empty severity table gives a uniform policy.
    pub fn from_config(
        destination: &str,
        rate: f64,
        severity_rates: &BTreeMap<String, f64>,
    ) -> Result<Self, StreamError> {
        check_rate(destination, "sampling_rate", rate)?;
        if severity_rates.is_empty() {
            return Ok(Self::Uniform(rate));
        }
        let mut by_severity = BTreeMap::new();
        for (name, &r) in severity_rates {
            let severity = Severity::from_str_loose(name).ok_or_else(|| {
                StreamError::invalid(destination, format!("unknown severity '{name}' in sampling"))
            })?;
            check_rate(destination, name, r)?;
            by_severity.insert(severity, r);
        }
        Ok(Self::Stratified {
            default_rate: rate,
            by_severity,
        })
    }

    /// Keep-probability for an event of this severity.
    pub fn rate_for(&self, severity: Severity) -> f64 {
        match self {
            Self::Uniform(rate) => *rate,
            Self::Stratified {
                default_rate,
                by_severity,
            } => by_severity.get(&severity).copied().unwrap_or(*default_rate),
        }
    }

    /// Draws the keep/drop decision.
    pub fn keep<R: Rng + ?Sized>(&self, severity: Severity, rng: &mut R) -> bool {
        let rate = self.rate_for(severity);
        if rate >= 1.0 {
            true
        } else if rate <= 0.0 {
            false
        } else {
            rng.gen_bool(rate)
        }
    }
}

fn check_rate(destination: &str, name: &str, rate: f64) -> Result<(), StreamError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(StreamError::invalid(
            destination,
            format!("{name} rate {rate} outside [0, 1]"),
        ))
    }
}
