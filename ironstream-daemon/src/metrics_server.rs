//! Prometheus exporter
//!
//! Uses the HTTP listener built into `metrics-exporter-prometheus`. Once installed,
//! every `metrics::counter!()` / `gauge!()` / `histogram!()` in the workspace is
//! scrapeable at `http://{listen_addr}:{port}/metrics`.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use ironstream_core::config::MetricsConfig;
use ironstream_core::metrics as m;

/// Parses and checks the listen address without binding.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is served",
            config.endpoint
        ));
    }
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {e}"))
}

/// Installs the global recorder and starts the HTTP listener.
///
/// Call once per process; a second install fails.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::CORRELATION_EVALUATION_DURATION_SECONDS.to_owned()),
            &m::EVALUATION_DURATION_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full(m::STREAM_DELIVERY_DURATION_SECONDS.to_owned()),
                &m::DELIVERY_DURATION_BUCKETS,
            )
        })
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {e}"))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    m::describe_all();
    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
