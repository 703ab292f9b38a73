//! End-to-end detection through the service task with YAML rules from disk.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ironstream_core::config::{ChainConfig, ChainStageConfig, CorrelationConfig};
use ironstream_core::event::CanonicalEvent;
use ironstream_core::pipeline::Pipeline;
use ironstream_core::types::{Alert, Severity};
use ironstream_correlation::{ChannelAlertSink, CorrelationService, CorrelationSettings};
use tokio::sync::mpsc;

const BRUTE_FORCE: &str = r#"
id: ssh_brute_force
name: SSH brute force
severity: high
event_types: [auth_failure]
conditions:
  - field: source
    value: sshd
entity:
  key: user_id
  window_secs: 300
  threshold: 5
cooldown_secs: 60
dedup_key: "{user_id}"
mitre_technique: T1110
recommended_actions:
  - Lock the account
  - Review source addresses
"#;

const PORT_SCAN: &str = r#"
id: port_scan
name: Port scan
severity: medium
event_types: [net_conn]
entity:
  key: source_ip
  window_secs: 300
  threshold: 10
  distinct_field: dst_port
cooldown_secs: 600
dedup_key: "{source_ip}"
mitre_technique: T1046
"#;

const EXFIL: &str = r#"
id: exfil_spike
name: Outbound transfer spike
severity: high
event_types: [net_flow]
statistical:
  field: bytes_out
  window_secs: 3600
  min_samples: 10
  deviation_multiplier: 3.0
"#;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn auth_failure(secs: i64, user: &str) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(at(secs), "sshd", format!("Failed password for {user}"))
            .event_type("auth_failure")
            .user_id(user)
            .build()
            .unwrap(),
    )
}

fn conn(secs: i64, src: &str, port: u16) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(at(secs), "fw", "connection attempt")
            .event_type("net_conn")
            .metadata("source_ip", src)
            .metadata("dst_port", port.to_string())
            .build()
            .unwrap(),
    )
}

fn flow(secs: i64, bytes: u64) -> Arc<CanonicalEvent> {
    Arc::new(
        CanonicalEvent::builder(at(secs), "fw", "flow closed")
            .event_type("net_flow")
            .metadata("bytes_out", bytes.to_string())
            .build()
            .unwrap(),
    )
}

async fn start_with_rules(
    config: CorrelationConfig,
) -> (CorrelationService, mpsc::Receiver<Alert>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("brute.yml"), BRUTE_FORCE).unwrap();
    std::fs::write(dir.path().join("scan.yaml"), PORT_SCAN).unwrap();
    std::fs::write(dir.path().join("exfil.yml"), EXFIL).unwrap();

    let config = CorrelationConfig {
        rule_dir: dir.path().display().to_string(),
        ..config
    };
    let settings = CorrelationSettings::from_core(&config).unwrap();
    let (sink, rx) = ChannelAlertSink::channel(64);
    let mut service = CorrelationService::new(settings, Arc::new(sink));
    service.start().await.unwrap();
    (service, rx, dir)
}

fn drain(rx: &mut mpsc::Receiver<Alert>) -> Vec<Alert> {
    let mut out = Vec::new();
    while let Ok(alert) = rx.try_recv() {
        out.push(alert);
    }
    out
}

#[tokio::test]
async fn brute_force_cooldown_sequence() {
    let (mut service, mut rx, _dir) = start_with_rules(CorrelationConfig::default()).await;
    let handle = service.handle();

    for i in 0..6 {
        handle.submit(auth_failure(i * 10, "alice")).await.unwrap();
    }
    handle.flush().await.unwrap();
    let alerts = drain(&mut rx);
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.rule_id, "ssh_brute_force");
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.dedup_key, "alice");
    assert_eq!(alert.mitre_technique.as_deref(), Some("T1110"));
    assert_eq!(alert.recommended_actions.len(), 2);
    assert_eq!(alert.events.len(), 6);

    // 7th inside the cooldown
    handle.submit(auth_failure(60, "alice")).await.unwrap();
    handle.flush().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    // 8th after the cooldown
    handle.submit(auth_failure(120, "alice")).await.unwrap();
    handle.flush().await.unwrap();
    assert_eq!(drain(&mut rx).len(), 1);

    let snap = handle.snapshot("ssh_brute_force").await.unwrap();
    assert_eq!(snap.counters.fired, 2);
    assert_eq!(snap.counters.suppressed, 1);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn port_scan_counts_distinct_ports() {
    let (mut service, mut rx, _dir) = start_with_rules(CorrelationConfig::default()).await;
    let handle = service.handle();

    // repeated hits on one port never add up
    for i in 0..30 {
        handle.submit(conn(i, "203.0.113.9", 443)).await.unwrap();
    }
    handle.flush().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    // ten distinct ports only reach the threshold
    for port in 1..=9 {
        handle
            .submit(conn(40 + i64::from(port), "203.0.113.9", port))
            .await
            .unwrap();
    }
    handle.flush().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    handle.submit(conn(50, "203.0.113.9", 10)).await.unwrap();
    handle.flush().await.unwrap();
    let alerts = drain(&mut rx);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].dedup_key, "203.0.113.9");
    assert!(alerts[0].message.contains("11 distinct dst_port"));
    service.stop().await.unwrap();
}

#[tokio::test]
async fn statistical_baseline_flags_spike() {
    let (mut service, mut rx, _dir) = start_with_rules(CorrelationConfig::default()).await;
    let handle = service.handle();

    for i in 0..40 {
        let bytes = if i % 2 == 0 { 90 } else { 110 };
        handle.submit(flow(i, bytes)).await.unwrap();
    }
    handle.submit(flow(50, 125)).await.unwrap();
    handle.flush().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    handle.submit(flow(51, 160)).await.unwrap();
    handle.flush().await.unwrap();
    let alerts = drain(&mut rx);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "exfil_spike");
    service.stop().await.unwrap();
}

#[tokio::test]
async fn attack_chain_emits_composite_alert() {
    let config = CorrelationConfig {
        chains: vec![ChainConfig {
            id: "recon_then_access".to_owned(),
            name: "Recon followed by credential attack".to_owned(),
            severity: None,
            mitre_technique: Some("TA0006".to_owned()),
            stages: vec![
                ChainStageConfig {
                    rule_id: "port_scan".to_owned(),
                    max_gap_secs: 0,
                },
                ChainStageConfig {
                    rule_id: "ssh_brute_force".to_owned(),
                    max_gap_secs: 900,
                },
            ],
        }],
        ..CorrelationConfig::default()
    };
    let (mut service, mut rx, _dir) = start_with_rules(config).await;
    let handle = service.handle();

    for port in 1..=11 {
        handle
            .submit(conn(i64::from(port), "198.51.100.7", port))
            .await
            .unwrap();
    }
    for i in 0..6 {
        handle.submit(auth_failure(100 + i, "root")).await.unwrap();
    }
    handle.flush().await.unwrap();

    let alerts = drain(&mut rx);
    let ids: Vec<&str> = alerts.iter().map(|a| a.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["port_scan", "ssh_brute_force", "recon_then_access"]);
    let composite = &alerts[2];
    assert!(composite.composite);
    assert_eq!(composite.severity, Severity::Critical);
    assert_eq!(composite.mitre_technique.as_deref(), Some("TA0006"));
    assert_eq!(composite.recommended_actions.len(), 2);

    let chains = handle.chain_snapshots().await.unwrap();
    assert_eq!(chains[0].fired, 1);
    service.stop().await.unwrap();
}

#[tokio::test]
async fn rules_can_be_managed_while_running() {
    let (mut service, mut rx, _dir) = start_with_rules(CorrelationConfig::default()).await;
    let handle = service.handle();
    assert_eq!(handle.snapshots().await.unwrap().len(), 3);

    handle.set_enabled("ssh_brute_force", false).await.unwrap();
    for i in 0..10 {
        handle.submit(auth_failure(i, "mallory")).await.unwrap();
    }
    handle.flush().await.unwrap();
    assert!(drain(&mut rx).is_empty());

    handle.remove_rule("ssh_brute_force").await.unwrap();
    let ids: Vec<String> = handle
        .snapshots()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec!["exfil_spike".to_owned(), "port_scan".to_owned()]);
    service.stop().await.unwrap();
}
