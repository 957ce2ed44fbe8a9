//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over `[general] log_level` when set.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logferry_core::config::GeneralConfig;

/// Installs the global subscriber. Call once, before any tracing macro.
///
/// * `"json"` - one JSON object per line
/// * `"pretty"` - human-readable multi-line output
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)),
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)),
        other => Err(anyhow::anyhow!(
            "unknown log format '{}', expected 'json' or 'pretty'",
            other
        )),
    }
}
