//! Timer-driven delivery behaviour, run on paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ironstream_core::config::StreamConfig;
use ironstream_core::event::CanonicalEvent;
use ironstream_core::pipeline::Pipeline;
use ironstream_stream::{
    CircuitKind, DestinationSettings, DropReason, MockConnector, ProtocolKind, StreamManager,
    StreamNotification, StreamSettings,
};

fn event(msg: &str) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(Utc::now(), "integration", msg)
            .event_type("test")
            .build()
            .unwrap(),
    )
}

fn destination(id: &str, batch_size: usize, flush_ms: u64) -> DestinationSettings {
    DestinationSettings::builder(id, ProtocolKind::File, "/dev/null")
        .batch_size(batch_size)
        .flush_interval(Duration::from_millis(flush_ms))
        .build()
}

#[tokio::test(start_paused = true)]
async fn partial_batch_seals_at_flush_interval() {
    let manager = StreamManager::new(StreamSettings::default());
    let mock = MockConnector::new();
    manager
        .register_with(destination("siem", 100, 500), mock.clone())
        .await
        .unwrap();

    for i in 0..3 {
        manager.dispatch(event(&format!("e{i}"))).await;
    }
    tokio::time::sleep(Duration::from_millis(499)).await;
    assert!(mock.received().is_empty());

    tokio::time::sleep(Duration::from_millis(2)).await;
    let received = mock.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 3);

    // the deadline follows the oldest buffered event, not the newest
    tokio::time::sleep(Duration::from_millis(99)).await;
    manager.dispatch(event("late-1")).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.dispatch(event("late-2")).await;
    tokio::time::sleep(Duration::from_millis(199)).await;
    assert_eq!(mock.received().len(), 1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let received = mock.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].len(), 2);
    assert_eq!(received[1].sequence, 1);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_stops_attempts_until_cooldown() {
    let core = StreamConfig {
        circuit_failure_threshold: 3,
        circuit_cooldown_secs: 30,
        max_retries: 100,
        retry_backoff_base_ms: 100,
        retry_backoff_max_ms: 1_000,
        ..StreamConfig::default()
    };
    let manager = StreamManager::new(StreamSettings::from_core(&core));
    let mock = MockConnector::new();
    mock.set_failing(true);
    manager
        .register_with(destination("flaky", 1, 1_000), mock.clone())
        .await
        .unwrap();

    manager.dispatch(event("x")).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.attempts(), 3);
    assert_eq!(
        manager.health("flaky").await.unwrap().circuit,
        CircuitKind::Open
    );

    // buffering continues while open
    manager.dispatch(event("y")).await;
    tokio::time::sleep(Duration::from_secs(28)).await;
    assert_eq!(mock.attempts(), 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(mock.attempts(), 4, "exactly one half-open trial");
    let times = mock.attempt_times();
    assert!(times[3] - times[2] >= Duration::from_secs(30));
    assert_eq!(
        manager.health("flaky").await.unwrap().circuit,
        CircuitKind::Open
    );

    // recovery: the next trial succeeds and both batches drain in order
    mock.set_failing(false);
    tokio::time::sleep(Duration::from_secs(31)).await;
    let received = mock.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].sequence, 0);
    assert_eq!(received[1].sequence, 1);
    assert_eq!(
        manager.health("flaky").await.unwrap().circuit,
        CircuitKind::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn dead_letter_store_is_bounded_and_evicts_oldest() {
    let core = StreamConfig {
        max_retries: 0,
        circuit_failure_threshold: 1_000,
        dead_letter_max_entries: 3,
        ..StreamConfig::default()
    };
    let manager = StreamManager::new(StreamSettings::from_core(&core));
    let mut notifications = manager.take_notifications().unwrap();
    assert!(manager.take_notifications().is_none());

    let mock = MockConnector::new();
    mock.set_failing(true);
    manager
        .register_with(destination("down", 1, 1_000), mock.clone())
        .await
        .unwrap();

    for i in 0..10 {
        manager.dispatch(event(&format!("e{i}"))).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let health = manager.health("down").await.unwrap();
    assert_eq!(health.dead_letter_size, 3);
    assert_eq!(health.counters.dead_lettered, 10);
    assert_eq!(health.counters.dropped, 7);

    let mut evicted = Vec::new();
    let mut failed = 0;
    while let Ok(n) = notifications.try_recv() {
        match n {
            StreamNotification::DeliveryFailed { .. } => failed += 1,
            StreamNotification::Dropped {
                sequence, reason, ..
            } => {
                assert_eq!(reason, DropReason::DeadLetterOverflow);
                evicted.push(sequence);
            }
        }
    }
    assert_eq!(failed, 10);
    assert_eq!(evicted, (0..7).collect::<Vec<u64>>());

    let report = manager.delete("down").await.unwrap();
    let remaining: Vec<u64> = report.leftovers.iter().map(|e| e.batch.sequence).collect();
    assert_eq!(remaining, vec![7, 8, 9]);
}

#[tokio::test(start_paused = true)]
async fn failing_destination_does_not_block_others() {
    let core = StreamConfig {
        circuit_failure_threshold: 1,
        ..StreamConfig::default()
    };
    let manager = StreamManager::new(StreamSettings::from_core(&core));
    let broken = MockConnector::new();
    broken.set_delay(Duration::from_secs(3));
    broken.set_failing(true);
    let healthy = MockConnector::new();
    manager
        .register_with(destination("broken", 1, 1_000), broken.clone())
        .await
        .unwrap();
    manager
        .register_with(destination("healthy", 1, 1_000), healthy.clone())
        .await
        .unwrap();

    for i in 0..5 {
        manager.dispatch(event(&format!("e{i}"))).await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(healthy.received().len(), 5);
    assert!(broken.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pressure_flush_on_slow_destination_does_not_delay_others() {
    let core = StreamConfig {
        max_buffer_events: 2,
        flush_on_memory_pressure: true,
        delivery_timeout_ms: 5_000,
        ..StreamConfig::default()
    };
    let manager = StreamManager::new(StreamSettings::from_core(&core));
    let slow = MockConnector::new();
    slow.set_delay(Duration::from_secs(60));
    let good = MockConnector::new();
    manager
        .register_with(destination("a_slow", 100, 3_600_000), slow.clone())
        .await
        .unwrap();
    manager
        .register_with(destination("b_good", 1, 3_600_000), good.clone())
        .await
        .unwrap();

    for i in 0..2 {
        let report = manager.dispatch(event(&format!("fill-{i}"))).await;
        assert_eq!(report.accepted(), 2);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(good.received_records(), 2);

    // a_slow is full and its flush is stuck behind a 5 s delivery timeout
    let started = tokio::time::Instant::now();
    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.dispatch(event("third")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());
    assert_eq!(good.received_records(), 3);

    let report = pending.await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(report.accepted(), 1);
    let slow_outcome = report
        .outcomes
        .iter()
        .find(|o| o.destination_id == "a_slow")
        .unwrap();
    assert!(matches!(&slow_outcome.result, Err(e) if e.is_backpressure()));
    assert!(!report.is_backpressured());
}

#[tokio::test(start_paused = true)]
async fn stop_announces_undelivered_batches_as_dropped() {
    let core = StreamConfig {
        max_retries: 0,
        shutdown_grace_secs: 1,
        ..StreamConfig::default()
    };
    let mut manager = StreamManager::new(StreamSettings::from_core(&core));
    let mut notifications = manager.take_notifications().unwrap();
    manager.start().await.unwrap();
    let mock = MockConnector::new();
    mock.set_failing(true);
    manager
        .register_with(destination("siem", 2, 3_600_000), mock.clone())
        .await
        .unwrap();

    for i in 0..5 {
        manager.dispatch(event(&format!("e{i}"))).await;
    }
    manager.stop().await.unwrap();
    assert_eq!(mock.received_records(), 0);

    let mut dropped = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let StreamNotification::Dropped {
            destination_id,
            events,
            reason: DropReason::Shutdown,
            ..
        } = notification
        {
            assert_eq!(destination_id, "siem");
            dropped.push(events);
        }
    }
    assert_eq!(dropped.iter().sum::<usize>(), 5);
}
