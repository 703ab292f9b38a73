//! Fan-out ordering across several destinations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ironstream_core::event::CanonicalEvent;
use ironstream_core::types::Severity;
use ironstream_normalizer::{FormatKind, Normalizer};
use ironstream_stream::{
    Condition, DestinationSettings, EnqueueOutcome, FilterChain, FilterRule, MockConnector,
    ProtocolKind, StreamManager, StreamSettings,
};

fn event(i: usize) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(Utc::now(), "fanout", format!("event-{i:04}"))
            .event_type("seq")
            .severity(if i % 10 == 0 { Severity::High } else { Severity::Low })
            .build()
            .unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn thousand_events_three_destinations_ten_ordered_batches_each() {
    let manager = StreamManager::new(StreamSettings::default());
    let formats = [FormatKind::Syslog, FormatKind::Cef, FormatKind::Ecs];
    let mut mocks = Vec::new();
    for (i, format) in formats.into_iter().enumerate() {
        let mock = MockConnector::new();
        let settings = DestinationSettings::builder(format!("dest-{i}"), ProtocolKind::File, "/dev/null")
            .format(format)
            .batch_size(100)
            .flush_interval(Duration::from_secs(60))
            .build();
        manager.register_with(settings, mock.clone()).await.unwrap();
        mocks.push((format, mock));
    }

    for i in 0..1_000 {
        let report = manager.dispatch(event(i)).await;
        assert_eq!(report.accepted(), 3);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let normalizer = Normalizer::default();
    for (format, mock) in &mocks {
        let batches = mock.received();
        assert_eq!(batches.len(), 10, "{format}");
        let mut expected = 0;
        for (seq, batch) in batches.iter().enumerate() {
            assert_eq!(batch.sequence, seq as u64);
            assert_eq!(batch.format, *format);
            assert_eq!(batch.len(), 100);
            for record in &batch.records {
                let parsed = normalizer.normalize(record).unwrap();
                assert_eq!(parsed.message(), format!("event-{expected:04}"));
                expected += 1;
            }
        }
        assert_eq!(expected, 1_000);
    }
}

#[tokio::test(start_paused = true)]
async fn filters_route_subsets_per_destination() {
    let manager = StreamManager::new(StreamSettings::default());
    let everything = MockConnector::new();
    let high_only = MockConnector::new();

    manager
        .register_with(
            DestinationSettings::builder("all", ProtocolKind::File, "/dev/null")
                .batch_size(1_000)
                .build(),
            everything.clone(),
        )
        .await
        .unwrap();
    manager
        .register_with(
            DestinationSettings::builder("high", ProtocolKind::File, "/dev/null")
                .batch_size(1_000)
                .filters(FilterChain::new(vec![FilterRule::include(
                    "severity",
                    Condition::Eq("high".to_owned()),
                )]))
                .build(),
            high_only.clone(),
        )
        .await
        .unwrap();

    for i in 0..100 {
        let report = manager.dispatch(event(i)).await;
        let high = report
            .outcomes
            .iter()
            .find(|o| o.destination_id == "high")
            .unwrap();
        let expected = if i % 10 == 0 {
            EnqueueOutcome::Accepted
        } else {
            EnqueueOutcome::Filtered
        };
        assert_eq!(high.result.as_ref().unwrap(), &expected);
    }
    manager.flush("all").await.unwrap();
    manager.flush("high").await.unwrap();

    assert_eq!(everything.received_records(), 100);
    assert_eq!(high_only.received_records(), 10);
    let health = manager.health("high").await.unwrap();
    assert_eq!(health.counters.filtered, 90);
    assert_eq!(health.counters.sent, 10);
}
