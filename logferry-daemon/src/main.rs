use anyhow::Result;
use clap::Parser;

use logferry_core::config::LogferryConfig;
use logferry_daemon::cli::DaemonCli;
use logferry_daemon::logging;
use logferry_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogferryConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!(
            "configuration is valid: {} input(s), {} output(s)",
            config.inputs.len(),
            config.outputs.len()
        );
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(config = %cli.config.display(), "logferry-daemon starting");

    let orchestrator = Orchestrator::build_from_config(config)?;
    orchestrator.run().await?;

    tracing::info!("logferry-daemon shut down");
    Ok(())
}
