//! Rolling baseline and deviation scoring.
//!
//! The baseline keeps its samples plus a Welford mean and sum of squared
//! deviations, updated and downdated per sample, so mean and population
//! standard deviation are O(1) per event and stay exact for large magnitudes.
//! Values flagged as anomalous are not absorbed into the baseline.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::rule::StatisticalSpec;

/// Why a value was flagged
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    /// More than `multiplier` standard deviations from the mean
    Deviation { mean: f64, stddev: f64, score: f64 },
    /// Above the configured percentile of the baseline
    Rare { percentile: f64, threshold: f64 },
}

/// Outcome of scoring one value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatObservation {
    pub value: f64,
    pub anomaly: Option<Anomaly>,
}

/// Rolling baseline for one numeric field
#[derive(Debug, Clone)]
pub struct Baseline {
    window: Duration,
    max_samples: usize,
    min_samples: usize,
    multiplier: f64,
    rare_percentile: Option<f64>,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    mean: f64,
    /// Sum of squared deviations from `mean`
    m2: f64,
}

impl Baseline {
    pub fn new(spec: &StatisticalSpec) -> Self {
        Self {
            window: super::window(spec.window_secs),
            max_samples: spec.max_samples.max(1),
            min_samples: spec.min_samples,
            multiplier: spec.deviation_multiplier,
            rare_percentile: spec.rare_percentile,
            samples: VecDeque::new(),
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Scores `value` against the baseline as of `now`, then absorbs it unless flagged.
    pub fn observe(&mut self, now: DateTime<Utc>, value: f64) -> StatObservation {
        self.purge(now);
        let anomaly = self.score(value);
        if anomaly.is_none() {
            self.push(now, value);
        }
        StatObservation { value, anomaly }
    }

    fn score(&self, value: f64) -> Option<Anomaly> {
        if self.samples.len() < self.min_samples {
            return None;
        }
        let mean = self.mean();
        let stddev = self.stddev();
        let distance = (value - mean).abs();

        let deviates = if stddev > 0.0 {
            distance > self.multiplier * stddev
        } else {
            // flat baseline: any visible change counts
            distance > f64::EPSILON * mean.abs().max(1.0)
        };
        if deviates {
            let score = if stddev > 0.0 {
                distance / stddev
            } else {
                f64::INFINITY
            };
            return Some(Anomaly::Deviation {
                mean,
                stddev,
                score,
            });
        }

        let percentile = self.rare_percentile?;
        let threshold = self.percentile(percentile)?;
        (value > threshold).then_some(Anomaly::Rare {
            percentile,
            threshold,
        })
    }

    fn push(&mut self, at: DateTime<Utc>, value: f64) {
        if self.samples.len() == self.max_samples {
            self.pop_front();
        }
        self.samples.push_back((at, value));
        let n = self.samples.len() as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
    }

    fn purge(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.samples.front().is_some_and(|(t, _)| *t < cutoff) {
            self.pop_front();
        }
    }

    fn pop_front(&mut self) {
        if let Some((_, v)) = self.samples.pop_front() {
            if self.samples.is_empty() {
                self.mean = 0.0;
                self.m2 = 0.0;
            } else {
                let n = self.samples.len() as f64;
                let old_mean = self.mean;
                self.mean -= (v - old_mean) / n;
                self.m2 = (self.m2 - (v - old_mean) * (v - self.mean)).max(0.0);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.m2 / self.samples.len() as f64).sqrt()
    }

    /// Nearest-rank percentile of the current samples.
    fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.samples.iter().map(|(_, v)| *v).collect();
        values.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * values.len() as f64).ceil() as usize;
        values.get(rank.clamp(1, values.len()) - 1).copied()
    }

    pub fn describe(field: &str, observation: &StatObservation) -> String {
        match observation.anomaly {
            Some(Anomaly::Deviation {
                mean,
                stddev,
                score,
            }) => format!(
                "{field}={} deviates {score:.1} stddev from baseline (mean {mean:.2}, stddev {stddev:.2})",
                observation.value
            ),
            Some(Anomaly::Rare {
                percentile,
                threshold,
            }) => format!(
                "{field}={} above p{percentile} of baseline ({threshold})",
                observation.value
            ),
            None => format!("{field}={} within baseline", observation.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(multiplier: f64, rare: Option<f64>) -> StatisticalSpec {
        StatisticalSpec {
            field: "bytes".to_owned(),
            window_secs: 3_600,
            max_samples: 1_000,
            min_samples: 10,
            deviation_multiplier: multiplier,
            rare_percentile: rare,
            weight: 1.0,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded(spec: &StatisticalSpec) -> Baseline {
        let mut b = Baseline::new(spec);
        for i in 0..20 {
            let v = if i % 2 == 0 { 90.0 } else { 110.0 };
            assert!(b.observe(at(i), v).anomaly.is_none());
        }
        b
    }

    #[test]
    fn welford_gives_population_stats() {
        let b = seeded(&spec(3.0, None));
        assert!((b.mean() - 100.0).abs() < 1e-9);
        assert!((b.stddev() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn three_sigma() {
        let mut b = seeded(&spec(3.0, None));
        let hit = b.observe(at(100), 140.0);
        assert!(matches!(hit.anomaly, Some(Anomaly::Deviation { score, .. }) if (score - 4.0).abs() < 1e-9));
        assert!(b.observe(at(101), 125.0).anomaly.is_none());
    }

    #[test]
    fn anomalies_are_not_absorbed() {
        let mut b = seeded(&spec(3.0, None));
        let before = b.len();
        b.observe(at(100), 10_000.0);
        assert_eq!(b.len(), before);
        assert!((b.mean() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_flagged_before_min_samples() {
        let mut b = Baseline::new(&spec(3.0, None));
        for i in 0..9 {
            b.observe(at(i), 100.0);
        }
        assert!(b.observe(at(9), 1e9).anomaly.is_none());
    }

    #[test]
    fn samples_leave_with_the_window() {
        let mut b = seeded(&spec(3.0, None));
        b.observe(at(3_700), 100.0);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn sample_cap_drops_oldest() {
        let mut s = spec(3.0, None);
        s.max_samples = 10;
        let b = seeded(&s);
        assert_eq!(b.len(), 10);
        assert!((b.mean() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn large_magnitudes_keep_their_spread() {
        let mut b = Baseline::new(&spec(3.0, None));
        for i in 0..20 {
            let v = if i % 2 == 0 { 1e9 - 10.0 } else { 1e9 + 10.0 };
            assert!(b.observe(at(i), v).anomaly.is_none());
        }
        assert_eq!(b.len(), 20);
        assert!((b.mean() - 1e9).abs() < 1e-3);
        assert!((b.stddev() - 10.0).abs() < 1e-3);

        // 1.5 sigma stays inside the baseline, 4 sigma does not
        assert!(b.observe(at(30), 1e9 + 15.0).anomaly.is_none());
        let hit = b.observe(at(31), 1e9 + 45.0);
        assert!(matches!(hit.anomaly, Some(Anomaly::Deviation { stddev, .. }) if stddev > 9.0));
    }

    #[test]
    fn window_eviction_keeps_stats_exact() {
        let mut s = spec(3.0, None);
        s.max_samples = 4;
        // below min_samples, so every value is absorbed
        let mut b = Baseline::new(&s);
        for (i, v) in [1e9 - 1_000.0, 1e9 + 1_000.0, 1e9 - 4.0, 1e9 + 4.0, 1e9 - 4.0, 1e9 + 4.0]
            .into_iter()
            .enumerate()
        {
            assert!(b.observe(at(i as i64), v).anomaly.is_none());
        }
        // only the last four remain: mean 1e9, population stddev 4
        assert_eq!(b.len(), 4);
        assert!((b.mean() - 1e9).abs() < 1e-3);
        assert!((b.stddev() - 4.0).abs() < 1e-3);
    }

    #[test]
    fn rare_percentile() {
        let mut b = Baseline::new(&spec(100.0, Some(90.0)));
        // descending, so no seed value sits above the running percentile
        for (n, v) in (1..=100).rev().enumerate() {
            assert!(b.observe(at(n as i64), f64::from(v)).anomaly.is_none());
        }
        assert_eq!(b.len(), 100);
        let hit = b.observe(at(200), 95.0);
        assert!(matches!(hit.anomaly, Some(Anomaly::Rare { threshold, .. }) if threshold == 90.0));
        assert!(b.observe(at(201), 80.0).anomaly.is_none());
    }
}
