//! Source connectors.
//!
//! A source reads newline-delimited frames from the network and pushes one
//! [`Message`] per frame into the dispatcher channel; the dispatcher
//! ([`crate::manager::forward`]) fans each message out to every output.
//!
//! Sources share the output lifecycle: `run()` blocks until `close()`.

pub mod tcp;
pub mod udp;

use std::future::Future;
use std::sync::Arc;

use logferry_core::config::{InOutDefinition, Params};
use logferry_core::message::Message;
use logferry_core::registry::Registry;
use tokio::sync::mpsc;

use crate::BoxFuture;
use crate::error::InputError;
use crate::state::InstanceState;

pub use tcp::TcpInput;
pub use udp::UdpInput;

/// Attribute carrying `<kind>:<peer address>` on every received message.
pub const SOURCE_ATTRIBUTE: &str = "source";

/// Lifecycle contract of a source.
pub trait Input: Send + Sync {
    fn kind(&self) -> &'static str;

    fn name(&self) -> String;

    fn state(&self) -> InstanceState;

    fn close(&self) -> bool;

    fn run(&self) -> impl Future<Output = Result<(), InputError>> + Send;

    fn wait_closed(&self) -> impl Future<Output = ()> + Send;
}

/// Object-safe form of [`Input`].
pub trait DynInput: Send + Sync {
    fn kind(&self) -> &'static str;

    fn name(&self) -> String;

    fn state(&self) -> InstanceState;

    fn close(&self) -> bool;

    fn run(&self) -> BoxFuture<'_, Result<(), InputError>>;

    fn wait_closed(&self) -> BoxFuture<'_, ()>;
}

impl<T: Input> DynInput for T {
    fn kind(&self) -> &'static str {
        Input::kind(self)
    }

    fn name(&self) -> String {
        Input::name(self)
    }

    fn state(&self) -> InstanceState {
        Input::state(self)
    }

    fn close(&self) -> bool {
        Input::close(self)
    }

    fn run(&self) -> BoxFuture<'_, Result<(), InputError>> {
        Box::pin(Input::run(self))
    }

    fn wait_closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(Input::wait_closed(self))
    }
}

/// What a source factory receives besides its parameters.
#[derive(Clone)]
pub struct InputContext {
    tx: mpsc::Sender<Message>,
}

impl InputContext {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.tx.clone()
    }
}

pub type InputFactory = fn(&InputContext, &Params) -> Result<Arc<dyn DynInput>, InputError>;

fn udp_factory(ctx: &InputContext, params: &Params) -> Result<Arc<dyn DynInput>, InputError> {
    Ok(Arc::new(UdpInput::from_params(ctx, params)?))
}

fn tcp_factory(ctx: &InputContext, params: &Params) -> Result<Arc<dyn DynInput>, InputError> {
    Ok(Arc::new(TcpInput::from_params(ctx, params)?))
}

/// Registers the in-tree sources. Returns the number of names added.
pub fn register_builtin_inputs(registry: &mut Registry<InputFactory>) -> usize {
    registry.register_aliases(&["udp", "udpin"], udp_factory)
        + registry.register_aliases(&["tcp", "tcpin"], tcp_factory)
}

/// Looks up `definition.kind` and constructs the source.
pub fn build_input(
    registry: &Registry<InputFactory>,
    ctx: &InputContext,
    definition: &InOutDefinition,
) -> Result<Arc<dyn DynInput>, InputError> {
    let factory = registry.resolve(&definition.kind)?;
    factory(ctx, &definition.params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_inputs_register_aliases() {
        let mut registry: Registry<InputFactory> = Registry::new("input");
        assert_eq!(register_builtin_inputs(&mut registry), 4);
        assert!(registry.contains("udpin"));
        assert!(registry.contains("TCP"));
        // registering again adds nothing
        assert_eq!(register_builtin_inputs(&mut registry), 0);
    }

    #[tokio::test]
    async fn build_input_reports_unknown_kind_and_bad_params() {
        let mut registry: Registry<InputFactory> = Registry::new("input");
        register_builtin_inputs(&mut registry);
        let (tx, _rx) = mpsc::channel(8);
        let ctx = InputContext::new(tx);

        let unknown = InOutDefinition::new("kafka", Params::new());
        assert!(matches!(
            build_input(&registry, &ctx, &unknown),
            Err(InputError::Registry(_))
        ));

        let missing_bind = InOutDefinition::new("udp", Params::new());
        assert!(matches!(
            build_input(&registry, &ctx, &missing_bind),
            Err(InputError::Config(_))
        ));

        let ok = InOutDefinition::new("udp", Params::new().with("bind", "127.0.0.1:0"));
        let input = build_input(&registry, &ctx, &ok).unwrap();
        assert_eq!(input.kind(), "udp");
        assert_eq!(input.state(), InstanceState::Idle);
    }
}
