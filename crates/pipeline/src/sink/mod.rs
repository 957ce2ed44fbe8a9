//! Built-in sink variants and their registration.
//!
//! Each variant is a [`SinkVariant`]; the factory wraps it in an
//! [`OutputHandler`] configured from the same parameter table.
//!
//! | type | aliases | destination |
//! |---|---|---|
//! | `stdout` | `console` | fixed |
//! | `file` | `fileout` | `path` (static or dynamic) |
//! | `tcp` | `tcpout` | fixed (`server`) |
//! | `http` | `webhook` | `url` (static or dynamic) |

pub mod file;
pub mod http;
pub mod stdout;
pub mod tcp;

use std::sync::Arc;

use logferry_core::config::{InOutDefinition, Params};
use logferry_core::registry::Registry;

use crate::config::HandlerSettings;
use crate::error::OutputError;
use crate::handler::{DynOutput, OutputHandler, SinkVariant};
use crate::pool::SharedPool;

pub use file::FileSink;
pub use http::HttpSink;
pub use stdout::StdoutSink;
pub use tcp::TcpSink;

/// Shared state handed to every output factory.
#[derive(Clone, Default)]
pub struct OutputContext {
    pub http_clients: Arc<SharedPool<reqwest::Client>>,
}

impl OutputContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool teardown; borrowers keep their clients until they drop them.
    pub fn shutdown(&self) {
        self.http_clients.clear();
    }
}

pub type OutputFactory = fn(&OutputContext, &Params) -> Result<Arc<dyn DynOutput>, OutputError>;

/// Wraps `variant` in a handler configured from `params`.
pub fn into_output<V: SinkVariant>(
    variant: V,
    params: &Params,
) -> Result<Arc<dyn DynOutput>, OutputError> {
    let settings = HandlerSettings::from_params(params)?;
    Ok(Arc::new(OutputHandler::new(variant, settings)))
}

fn stdout_factory(_ctx: &OutputContext, params: &Params) -> Result<Arc<dyn DynOutput>, OutputError> {
    into_output(StdoutSink::from_params(params)?, params)
}

fn file_factory(_ctx: &OutputContext, params: &Params) -> Result<Arc<dyn DynOutput>, OutputError> {
    into_output(FileSink::from_params(params)?, params)
}

fn tcp_factory(_ctx: &OutputContext, params: &Params) -> Result<Arc<dyn DynOutput>, OutputError> {
    into_output(TcpSink::from_params(params)?, params)
}

fn http_factory(ctx: &OutputContext, params: &Params) -> Result<Arc<dyn DynOutput>, OutputError> {
    into_output(HttpSink::from_params(ctx, params)?, params)
}

/// Registers the in-tree sinks. Returns the number of names added.
pub fn register_builtin_outputs(registry: &mut Registry<OutputFactory>) -> usize {
    registry.register_aliases(&["stdout", "console"], stdout_factory)
        + registry.register_aliases(&["file", "fileout"], file_factory)
        + registry.register_aliases(&["tcp", "tcpout"], tcp_factory)
        + registry.register_aliases(&["http", "webhook"], http_factory)
}

/// Looks up `definition.kind` and constructs the output.
pub fn build_output(
    registry: &Registry<OutputFactory>,
    ctx: &OutputContext,
    definition: &InOutDefinition,
) -> Result<Arc<dyn DynOutput>, OutputError> {
    let factory = registry.resolve(&definition.kind)?;
    factory(ctx, &definition.params)
}
