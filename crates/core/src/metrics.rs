//! Metric names and descriptions.
//!
//! Every Prometheus metric name lives here so the crates that record them
//! (`metrics::counter!()`, `gauge!()`, `histogram!()`) and the daemon's exporter agree.
//!
//! # Naming
//!
//! - prefix: `ironstream_`
//! - component: `normalizer_`, `stream_`, `correlation_`, `daemon_`
//! - suffix: `_total` (counter), `_seconds` (histogram), none (gauge)
//!
//! ```ignore
//! use ironstream_core::metrics as m;
//!
//! metrics::counter!(m::STREAM_EVENTS_SENT_TOTAL, m::LABEL_DESTINATION => "siem").increment(10);
//! ```

// ─── label keys ────────────────────────────────────────────────────

/// Destination id
pub const LABEL_DESTINATION: &str = "destination";

/// Severity (low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// Wire format (cef, leef, ecs, syslog, json)
pub const LABEL_FORMAT: &str = "format";

/// Rejection / drop reason
pub const LABEL_REASON: &str = "reason";

/// Correlation rule id
pub const LABEL_RULE: &str = "rule";

/// Outcome (accepted, rejected, success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── normalizer ────────────────────────────────────────────────────

/// Normalizer: events normalized (counter, label: format)
pub const NORMALIZER_EVENTS_TOTAL: &str = "ironstream_normalizer_events_total";

/// Normalizer: raw events rejected (counter, label: reason)
pub const NORMALIZER_REJECTED_TOTAL: &str = "ironstream_normalizer_rejected_total";

/// Normalizer: swallowed enrichment failures (counter)
pub const NORMALIZER_ENRICHMENT_FAILURES_TOTAL: &str =
    "ironstream_normalizer_enrichment_failures_total";

// ─── stream manager ────────────────────────────────────────────────

/// Stream: events admitted to a destination buffer (counter, label: destination)
pub const STREAM_EVENTS_ENQUEUED_TOTAL: &str = "ironstream_stream_events_enqueued_total";

/// Stream: events delivered (counter, label: destination)
pub const STREAM_EVENTS_SENT_TOTAL: &str = "ironstream_stream_events_sent_total";

/// Stream: failed delivery attempts, counted per event (counter, label: destination)
pub const STREAM_EVENTS_FAILED_TOTAL: &str = "ironstream_stream_events_failed_total";

/// Stream: events removed by filter rules (counter, label: destination)
pub const STREAM_EVENTS_FILTERED_TOTAL: &str = "ironstream_stream_events_filtered_total";

/// Stream: events removed by sampling (counter, label: destination)
pub const STREAM_EVENTS_SAMPLED_OUT_TOTAL: &str = "ironstream_stream_events_sampled_out_total";

/// Stream: events rejected with backpressure (counter, label: destination)
pub const STREAM_EVENTS_REJECTED_TOTAL: &str = "ironstream_stream_events_rejected_total";

/// Stream: events skipped because the destination is disabled (counter, label: destination)
pub const STREAM_EVENTS_DISABLED_TOTAL: &str = "ironstream_stream_events_disabled_total";

/// Stream: events moved to the dead-letter store (counter, label: destination)
pub const STREAM_EVENTS_DEAD_LETTERED_TOTAL: &str = "ironstream_stream_events_dead_lettered_total";

/// Stream: events permanently dropped (counter, labels: destination, reason)
pub const STREAM_EVENTS_DROPPED_TOTAL: &str = "ironstream_stream_events_dropped_total";

/// Stream: batches delivered (counter, label: destination)
pub const STREAM_BATCHES_SENT_TOTAL: &str = "ironstream_stream_batches_sent_total";

/// Stream: connector call latency (histogram, seconds, label: destination)
pub const STREAM_DELIVERY_DURATION_SECONDS: &str = "ironstream_stream_delivery_duration_seconds";

/// Stream: buffered events (gauge, label: destination)
pub const STREAM_BUFFERED_EVENTS: &str = "ironstream_stream_buffered_events";

/// Stream: dead-letter entries (gauge, label: destination)
pub const STREAM_DEAD_LETTER_SIZE: &str = "ironstream_stream_dead_letter_size";

/// Stream: circuit state, 0 closed / 1 half-open / 2 open (gauge, label: destination)
pub const STREAM_CIRCUIT_STATE: &str = "ironstream_stream_circuit_state";

// ─── correlation engine ────────────────────────────────────────────

/// Correlation: events evaluated (counter)
pub const CORRELATION_EVENTS_EVALUATED_TOTAL: &str =
    "ironstream_correlation_events_evaluated_total";

/// Correlation: alerts fired (counter, labels: rule, severity)
pub const CORRELATION_ALERTS_TOTAL: &str = "ironstream_correlation_alerts_total";

/// Correlation: alerts suppressed by cooldown (counter, label: rule)
pub const CORRELATION_ALERTS_SUPPRESSED_TOTAL: &str =
    "ironstream_correlation_alerts_suppressed_total";

/// Correlation: rule evaluation errors (counter, label: rule)
pub const CORRELATION_RULE_ERRORS_TOTAL: &str = "ironstream_correlation_rule_errors_total";

/// Correlation: composite attack-chain alerts (counter, label: rule)
pub const CORRELATION_CHAIN_ALERTS_TOTAL: &str = "ironstream_correlation_chain_alerts_total";

/// Correlation: per-event evaluation time (histogram, seconds)
pub const CORRELATION_EVALUATION_DURATION_SECONDS: &str =
    "ironstream_correlation_evaluation_duration_seconds";

/// Correlation: registered rules (gauge)
pub const CORRELATION_RULES_LOADED: &str = "ironstream_correlation_rules_loaded";

// ─── daemon ────────────────────────────────────────────────────────

/// Daemon: submissions (counter, labels: result, reason)
pub const DAEMON_SUBMISSIONS_TOTAL: &str = "ironstream_daemon_submissions_total";

/// Daemon: open ingest connections (gauge)
pub const DAEMON_INGEST_CONNECTIONS: &str = "ironstream_daemon_ingest_connections";

/// Daemon: uptime (gauge, seconds)
pub const DAEMON_UPTIME_SECONDS: &str = "ironstream_daemon_uptime_seconds";

/// Daemon: build info (gauge, always 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "ironstream_daemon_build_info";

// ─── histogram buckets ─────────────────────────────────────────────

/// In-process evaluation buckets (seconds), 10µs to 100ms
pub const EVALUATION_DURATION_BUCKETS: [f64; 9] =
    [0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1];

/// Connector call buckets (seconds), 1ms to 30s
pub const DELIVERY_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

/// Registers descriptions for every metric.
///
/// Call once after the recorder is installed. Safe without a recorder.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // normalizer
    describe_counter!(NORMALIZER_EVENTS_TOTAL, "Raw events normalized");
    describe_counter!(
        NORMALIZER_REJECTED_TOTAL,
        "Raw events rejected as malformed, incomplete or oversized"
    );
    describe_counter!(
        NORMALIZER_ENRICHMENT_FAILURES_TOTAL,
        "Enrichment failures swallowed during normalization"
    );

    // stream
    describe_counter!(
        STREAM_EVENTS_ENQUEUED_TOTAL,
        "Events admitted to a destination buffer"
    );
    describe_counter!(STREAM_EVENTS_SENT_TOTAL, "Events delivered to destinations");
    describe_counter!(
        STREAM_EVENTS_FAILED_TOTAL,
        "Events in failed delivery attempts"
    );
    describe_counter!(STREAM_EVENTS_FILTERED_TOTAL, "Events removed by filter rules");
    describe_counter!(STREAM_EVENTS_SAMPLED_OUT_TOTAL, "Events removed by sampling");
    describe_counter!(
        STREAM_EVENTS_REJECTED_TOTAL,
        "Events rejected because the destination buffer was full"
    );
    describe_counter!(
        STREAM_EVENTS_DISABLED_TOTAL,
        "Events skipped because the destination is disabled"
    );
    describe_counter!(
        STREAM_EVENTS_DEAD_LETTERED_TOTAL,
        "Events moved to the dead-letter store"
    );
    describe_counter!(STREAM_EVENTS_DROPPED_TOTAL, "Events permanently dropped");
    describe_counter!(STREAM_BATCHES_SENT_TOTAL, "Batches delivered");
    describe_histogram!(
        STREAM_DELIVERY_DURATION_SECONDS,
        "Connector send latency in seconds"
    );
    describe_gauge!(STREAM_BUFFERED_EVENTS, "Events buffered per destination");
    describe_gauge!(STREAM_DEAD_LETTER_SIZE, "Dead-letter entries per destination");
    describe_gauge!(
        STREAM_CIRCUIT_STATE,
        "Circuit state per destination (0 closed, 1 half-open, 2 open)"
    );

    // correlation
    describe_counter!(
        CORRELATION_EVENTS_EVALUATED_TOTAL,
        "Events evaluated by the correlation engine"
    );
    describe_counter!(CORRELATION_ALERTS_TOTAL, "Alerts fired");
    describe_counter!(
        CORRELATION_ALERTS_SUPPRESSED_TOTAL,
        "Alerts suppressed by cooldown"
    );
    describe_counter!(
        CORRELATION_RULE_ERRORS_TOTAL,
        "Rule evaluation errors (isolated per rule)"
    );
    describe_counter!(
        CORRELATION_CHAIN_ALERTS_TOTAL,
        "Composite attack-chain alerts fired"
    );
    describe_histogram!(
        CORRELATION_EVALUATION_DURATION_SECONDS,
        "Time to evaluate one event against all relevant rules"
    );
    describe_gauge!(CORRELATION_RULES_LOADED, "Registered correlation rules");

    // daemon
    describe_counter!(DAEMON_SUBMISSIONS_TOTAL, "Raw event submissions by outcome");
    describe_gauge!(DAEMON_INGEST_CONNECTIONS, "Open ingest connections");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1)");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        NORMALIZER_EVENTS_TOTAL,
        NORMALIZER_REJECTED_TOTAL,
        NORMALIZER_ENRICHMENT_FAILURES_TOTAL,
        STREAM_EVENTS_ENQUEUED_TOTAL,
        STREAM_EVENTS_SENT_TOTAL,
        STREAM_EVENTS_FAILED_TOTAL,
        STREAM_EVENTS_FILTERED_TOTAL,
        STREAM_EVENTS_SAMPLED_OUT_TOTAL,
        STREAM_EVENTS_REJECTED_TOTAL,
        STREAM_EVENTS_DISABLED_TOTAL,
        STREAM_EVENTS_DEAD_LETTERED_TOTAL,
        STREAM_EVENTS_DROPPED_TOTAL,
        STREAM_BATCHES_SENT_TOTAL,
        STREAM_DELIVERY_DURATION_SECONDS,
        STREAM_BUFFERED_EVENTS,
        STREAM_DEAD_LETTER_SIZE,
        STREAM_CIRCUIT_STATE,
        CORRELATION_EVENTS_EVALUATED_TOTAL,
        CORRELATION_ALERTS_TOTAL,
        CORRELATION_ALERTS_SUPPRESSED_TOTAL,
        CORRELATION_RULE_ERRORS_TOTAL,
        CORRELATION_CHAIN_ALERTS_TOTAL,
        CORRELATION_EVALUATION_DURATION_SECONDS,
        CORRELATION_RULES_LOADED,
        DAEMON_SUBMISSIONS_TOTAL,
        DAEMON_INGEST_CONNECTIONS,
        DAEMON_UPTIME_SECONDS,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn metric_names_are_prefixed_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for name in ALL_METRIC_NAMES {
            assert!(name.starts_with("ironstream_"), "{name} lacks prefix");
            assert!(seen.insert(*name), "{name} is defined twice");
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            let is_counter_like = name.contains("_events_") && !name.ends_with("_events");
            if is_counter_like {
                assert!(name.ends_with("_total"), "{name} should end with _total");
            }
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn buckets_are_sorted() {
        for buckets in [
            &EVALUATION_DURATION_BUCKETS[..],
            &DELIVERY_DURATION_BUCKETS[..],
        ] {
            assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
