//! logferry daemon library.
//!
//! Exposes the daemon's modules for integration tests; production use is
//! the `logferry-daemon` binary.

pub mod admin;
pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
