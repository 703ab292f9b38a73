//! Sliding-window count and sequence checks.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use ironstream_core::types::EventRef;

use crate::rule::TemporalSpec;

/// Per-rule sliding window of event snapshots, in arrival order.
///
/// Holds at most `max_events` snapshots; a full window evicts its oldest.
#[derive(Debug, Clone)]
pub struct TemporalWindow {
    window: Duration,
    threshold: Option<usize>,
    sequence: Vec<String>,
    ordered: bool,
    max_events: usize,
    events: VecDeque<EventRef>,
}

impl TemporalWindow {
    pub fn new(spec: &TemporalSpec, max_events: usize) -> Self {
        Self {
            window: super::window(spec.window_secs),
            threshold: spec.threshold,
            sequence: spec.sequence.clone(),
            ordered: spec.ordered,
            max_events: max_events.max(1),
            events: VecDeque::new(),
        }
    }

    /// Drops snapshots older than the window, measured back from `now`.
    pub fn purge(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            self.events.pop_front();
        }
    }

    /// Purges, records the event, and reports whether the window is satisfied.
    pub fn observe(&mut self, event: EventRef) -> bool {
        self.purge(event.timestamp);
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.is_satisfied()
    }

    pub fn is_satisfied(&self) -> bool {
        let count_ok = self.threshold.is_none_or(|t| self.events.len() >= t);
        count_ok && self.sequence_ok()
    }

    fn sequence_ok(&self) -> bool {
        if self.sequence.is_empty() {
            return true;
        }
        if self.ordered {
            let mut want = self.sequence.iter().peekable();
            for e in &self.events {
                if want.peek().is_some_and(|t| **t == e.event_type) {
                    want.next();
                }
            }
            want.peek().is_none()
        } else {
            self.sequence
                .iter()
                .all(|t| self.events.iter().any(|e| &e.event_type == t))
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &EventRef> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn describe(&self) -> String {
        if self.sequence.is_empty() {
            format!(
                "{} events within {}s",
                self.events.len(),
                self.window.num_seconds()
            )
        } else {
            format!(
                "sequence [{}] within {}s",
                self.sequence.join(" -> "),
                self.window.num_seconds()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64, event_type: &str) -> EventRef {
        EventRef {
            event_id: format!("{event_type}-{secs}"),
            timestamp: DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
            event_type: event_type.to_owned(),
        }
    }

    fn spec(
        secs: u64,
        threshold: Option<usize>,
        sequence: &[&str],
        ordered: bool,
    ) -> TemporalSpec {
        TemporalSpec {
            window_secs: secs,
            threshold,
            sequence: sequence.iter().map(|s| (*s).to_owned()).collect(),
            ordered,
            weight: 1.0,
        }
    }

    fn window(
        secs: u64,
        threshold: Option<usize>,
        sequence: &[&str],
        ordered: bool,
    ) -> TemporalWindow {
        TemporalWindow::new(&spec(secs, threshold, sequence, ordered), 1_000)
    }

    #[test]
    fn threshold_reached_inside_window() {
        let mut w = window(60, Some(3), &[], true);
        assert!(!w.observe(at(0, "x")));
        assert!(!w.observe(at(10, "x")));
        assert!(w.observe(at(20, "x")));
    }

    #[test]
    fn old_events_are_purged_before_counting() {
        let mut w = window(60, Some(3), &[], true);
        w.observe(at(0, "x"));
        w.observe(at(10, "x"));
        assert!(!w.observe(at(69, "x")));
        assert_eq!(w.len(), 2);
        assert!(w.events().all(|e| e.timestamp >= at(9, "x").timestamp));
    }

    #[test]
    fn boundary_event_stays() {
        let mut w = window(60, Some(2), &[], true);
        w.observe(at(0, "x"));
        assert!(w.observe(at(60, "x")));
    }

    #[test]
    fn ordered_sequence_is_a_subsequence() {
        let mut w = window(300, None, &["login", "sudo", "exfil"], true);
        assert!(!w.observe(at(0, "sudo")));
        assert!(!w.observe(at(1, "login")));
        assert!(!w.observe(at(2, "noise")));
        assert!(!w.observe(at(3, "exfil")));
        assert!(!w.observe(at(4, "sudo")));
        assert!(w.observe(at(5, "exfil")));
    }

    #[test]
    fn unordered_sequence_needs_every_type() {
        let mut w = window(300, None, &["a", "b"], false);
        assert!(!w.observe(at(0, "b")));
        assert!(w.observe(at(1, "a")));
    }

    #[test]
    fn sequence_and_threshold_both_apply() {
        let mut w = window(300, Some(4), &["a", "b"], true);
        w.observe(at(0, "a"));
        assert!(!w.observe(at(1, "b")));
        w.observe(at(2, "c"));
        assert!(w.observe(at(3, "c")));
    }

    #[test]
    fn full_window_evicts_oldest_first() {
        let mut w = TemporalWindow::new(&spec(3600, Some(5), &[], true), 3);
        for i in 0..10 {
            assert!(!w.observe(at(i, "x")));
        }
        assert_eq!(w.len(), 3);
        let ids: Vec<&str> = w.events().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["x-7", "x-8", "x-9"]);
    }

    #[test]
    fn eviction_can_break_a_sequence() {
        let mut w = TemporalWindow::new(&spec(3600, None, &["login", "exfil"], true), 2);
        w.observe(at(0, "login"));
        w.observe(at(1, "noise"));
        assert!(!w.observe(at(2, "exfil")));
        assert!(!w.observe(at(3, "login")));
        assert!(w.observe(at(4, "exfil")));
    }
}
