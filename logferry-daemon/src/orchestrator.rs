//! Daemon assembly and lifecycle.
//!
//! The [`Orchestrator`] turns a [`LogferryConfig`] into running instances:
//!
//! 1. build the output and input registries
//! 2. construct every `[[outputs]]` entry (failures are logged and skipped)
//! 3. construct every `[[inputs]]` entry against one shared channel
//! 4. spawn each instance's `run`, the dispatcher and the admin façade
//!
//! # Shutdown order
//!
//! 1. inputs (stop producing)
//! 2. dispatcher (forward what is still queued)
//! 3. outputs (final flush, bounded by `shutdown_timeout_secs`)
//! 4. admin façade and shared client pools

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use logferry_core::config::LogferryConfig;
use logferry_core::message::Message;
use logferry_core::metrics as m;
use logferry_core::registry::Registry;
use logferry_pipeline::{
    InputContext, InputFactory, IoManager, OutputContext, OutputFactory, build_input,
    build_output, forward, register_builtin_inputs, register_builtin_outputs,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::admin::{self, AdminState};
use crate::metrics_server;

/// Constructed daemon, ready to run.
pub struct Orchestrator {
    config: Arc<LogferryConfig>,
    manager: Arc<IoManager>,
    output_ctx: OutputContext,
    rx: mpsc::Receiver<Message>,
    skipped: usize,
}

impl Orchestrator {
    /// Loads `config_path` (with environment overrides) and builds.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = LogferryConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Builds from an already-loaded configuration.
    ///
    /// Installs the metrics recorder when enabled, so call it from inside
    /// the tokio runtime.
    pub fn build_from_config(config: LogferryConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let mut output_registry: Registry<OutputFactory> = Registry::new("output");
        register_builtin_outputs(&mut output_registry);
        let mut input_registry: Registry<InputFactory> = Registry::new("input");
        register_builtin_inputs(&mut input_registry);
        tracing::debug!(
            outputs = ?output_registry.names(),
            inputs = ?input_registry.names(),
            "registries ready"
        );

        let manager = Arc::new(IoManager::new());
        let output_ctx = OutputContext::new();
        let mut skipped = 0;

        for (idx, definition) in config.outputs.iter().enumerate() {
            match build_output(&output_registry, &output_ctx, definition) {
                Ok(output) => {
                    manager.register_output(output);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::error!(
                        index = idx,
                        kind = %definition.kind,
                        error = %e,
                        "output skipped"
                    );
                }
            }
        }

        let (tx, rx) = mpsc::channel(config.general.channel_capacity);
        let input_ctx = InputContext::new(tx);
        for (idx, definition) in config.inputs.iter().enumerate() {
            match build_input(&input_registry, &input_ctx, definition) {
                Ok(input) => {
                    manager.register_input(input);
                }
                Err(e) => {
                    skipped += 1;
                    tracing::error!(
                        index = idx,
                        kind = %definition.kind,
                        error = %e,
                        "input skipped"
                    );
                }
            }
        }
        // only the inputs keep senders, so the dispatcher sees the channel
        // close once they all stop
        drop(input_ctx);

        tracing::info!(
            outputs = manager.output_count(),
            inputs = manager.input_count(),
            skipped,
            "orchestrator initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            manager,
            output_ctx,
            rx,
            skipped,
        })
    }

    pub fn config(&self) -> &LogferryConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<IoManager> {
        &self.manager
    }

    /// Definitions that failed to construct.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handling failed, shutting down"),
            }
        })
        .await
    }

    /// Runs until `shutdown` completes, then stops everything in order.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            config,
            manager,
            output_ctx,
            rx,
            ..
        } = self;

        let admin_cancel = CancellationToken::new();
        let admin_task = if config.admin.enabled {
            let addr: SocketAddr = format!("{}:{}", config.admin.listen_addr, config.admin.port)
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid admin listen address: {}", e))?;
            let state = AdminState {
                config: Arc::clone(&config),
                manager: Arc::clone(&manager),
            };
            let (_, handle) = admin::serve(addr, state, admin_cancel.clone()).await?;
            Some(handle)
        } else {
            None
        };

        let mut outputs = JoinSet::new();
        for (id, output) in manager.outputs() {
            outputs.spawn(async move {
                if let Err(e) = output.run().await {
                    tracing::error!(%id, kind = output.kind(), error = %e, "output stopped with error");
                }
            });
        }
        let mut inputs = JoinSet::new();
        for (id, input) in manager.inputs() {
            inputs.spawn(async move {
                if let Err(e) = input.run().await {
                    tracing::error!(%id, kind = input.kind(), error = %e, "input stopped with error");
                }
            });
        }
        record_running(outputs.len(), inputs.len());

        let dispatcher_cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(forward(
            Arc::clone(&manager),
            rx,
            dispatcher_cancel.clone(),
        ));

        tracing::info!("logferry running");
        shutdown.await;

        let timeout = Duration::from_secs(config.general.shutdown_timeout_secs);

        let closing = manager.close_all_inputs();
        tracing::info!(closing, "stopping inputs");
        drain(&mut inputs, "input", timeout).await;

        dispatcher_cancel.cancel();
        match dispatcher.await {
            Ok(received) => tracing::info!(received, "dispatcher stopped"),
            Err(e) => tracing::error!(error = %e, "dispatcher task failed"),
        }

        let closing = manager.close_all_outputs();
        tracing::info!(closing, "stopping outputs");
        drain(&mut outputs, "output", timeout).await;
        record_running(0, 0);

        admin_cancel.cancel();
        if let Some(task) = admin_task {
            let _ = task.await;
        }

        output_ctx.shutdown();
        tracing::info!("logferry stopped");
        Ok(())
    }
}

/// Awaits every task, aborting the rest after `timeout`.
async fn drain(tasks: &mut JoinSet<()>, category: &'static str, timeout: Duration) {
    let all = async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(category, error = %e, "instance task panicked");
            }
        }
    };
    if tokio::time::timeout(timeout, all).await.is_err() {
        tracing::warn!(
            category,
            remaining = tasks.len(),
            timeout_secs = timeout.as_secs(),
            "instances did not finish in time, aborting"
        );
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_running(outputs: usize, inputs: usize) {
    metrics::gauge!(m::DAEMON_OUTPUTS_RUNNING).set(outputs as f64);
    metrics::gauge!(m::DAEMON_INPUTS_RUNNING).set(inputs as f64);
}

/// Waits for SIGTERM or SIGINT and returns which one arrived.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
