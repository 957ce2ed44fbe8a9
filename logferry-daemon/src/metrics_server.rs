//! Prometheus scrape endpoint.
//!
//! Uses the HTTP listener built into `metrics-exporter-prometheus`; every
//! `metrics::counter!` / `gauge!` / `histogram!` call in the workspace
//! records into it once installed.

use std::net::SocketAddr;

use anyhow::Result;
use logferry_core::config::MetricsConfig;
use logferry_core::metrics as m;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Installs the global recorder and starts the listener.
///
/// Call once per process, from inside the tokio runtime.
///
/// # Errors
///
/// - endpoint other than `/metrics`
/// - unparsable listen address
/// - socket bind failure or a recorder already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is served",
            config.endpoint
        ));
    }

    let addr: SocketAddr = format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::OUTPUT_FLUSH_DURATION_SECONDS.to_owned()),
            &m::FLUSH_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
