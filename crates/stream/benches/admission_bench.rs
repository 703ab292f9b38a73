//! Per-event admission cost (filters, sampling) and batch encoding.

use std::hint::black_box;
use std::sync::Arc;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ironstream_core::event::CanonicalEvent;
use ironstream_core::types::Severity;
use ironstream_normalizer::FormatKind;
use ironstream_stream::{Batch, Condition, FilterChain, FilterRule, SamplingPolicy};
use rand::SeedableRng;
use rand::rngs::StdRng;
use regex::Regex;

fn event(i: usize) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(Utc::now(), "bench", format!("connection {i} accepted"))
            .event_type("net_conn")
            .severity(Severity::Medium)
            .metadata("dst_port", (i % 65_535).to_string())
            .metadata("source_ip", "10.1.2.3")
            .build()
            .unwrap(),
    )
}

fn bench_filters(c: &mut Criterion) {
    let chain = FilterChain::new(vec![
        FilterRule::exclude("event_type", Condition::Eq("heartbeat".to_owned())),
        FilterRule::exclude(
            "dst_port",
            Condition::Range {
                min: Some(49_152.0),
                max: None,
            },
        ),
        FilterRule::include(
            "message",
            Condition::Regex(Regex::new(r"^connection \d+").unwrap()),
        ),
    ]);
    let e = event(443);
    c.bench_function("filter_chain_admits", |b| {
        b.iter(|| black_box(chain.admits(black_box(&e))))
    });
}

fn bench_sampling(c: &mut Criterion) {
    let policy = SamplingPolicy::Uniform(0.5);
    let mut rng = StdRng::seed_from_u64(42);
    c.bench_function("sampling_uniform", |b| {
        b.iter(|| black_box(policy.keep(Severity::Medium, &mut rng)))
    });
}

fn bench_encode(c: &mut Criterion) {
    let events: Vec<Arc<CanonicalEvent>> = (0..100).map(event).collect();
    let bytes = events.iter().map(|e| e.approx_size()).sum();
    let batch = Batch {
        destination_id: Arc::from("bench"),
        sequence: 0,
        events: events.into(),
        bytes,
    };
    let mut group = c.benchmark_group("encode_batch_100");
    group.throughput(Throughput::Elements(100));
    for kind in FormatKind::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, &kind| {
            b.iter(|| black_box(batch.encode(kind, false)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filters, bench_sampling, bench_encode);
criterion_main!(benches);
