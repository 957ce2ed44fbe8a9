//! CLI argument definitions for logferry-daemon.

use std::path::PathBuf;

use clap::Parser;

/// logferry log shipping daemon.
///
/// Builds the inputs and outputs named in `logferry.toml`, forwards every
/// received message to every output and serves the administrative API.
#[derive(Parser, Debug)]
#[command(name = "logferry-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logferry.toml configuration file.
    #[arg(short, long, default_value = "/etc/logferry/logferry.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}
