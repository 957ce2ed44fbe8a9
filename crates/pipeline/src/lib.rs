//! logferry output pipeline.
//!
//! # Modules
//!
//! - [`handler`]: output handler (buffer, flush loop, lifecycle) and the
//!   [`SinkVariant`] seam every backend implements
//! - [`destination`]: static and per-message destination paths, batch
//!   partitioning
//! - [`guard`]: lazy validated connections with a single fault boundary
//! - [`pool`]: named pools of shared clients
//! - [`manager`]: registry of running inputs and outputs, dispatcher
//! - [`sink`], [`source`]: in-tree backends and their registration
//! - [`buffer`], [`config`], [`state`], [`error`]
//!
//! # Architecture
//!
//! ```text
//! sources ─mpsc→ forward() ─enqueue→ OutputHandler ─flush→ partition ─→ guard ─→ SinkVariant::send_batch
//!                                        │                                 │
//!                                   MessageBuffer                    connect / probe
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod buffer;
pub mod config;
pub mod destination;
pub mod error;
pub mod guard;
pub mod handler;
pub mod manager;
pub mod pool;
pub mod sink;
pub mod source;
pub mod state;

/// Boxed `Send` future returned by the object-safe traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use buffer::MessageBuffer;
pub use config::{DropPolicy, HandlerSettings};
pub use destination::{DestinationPath, Partition};
pub use error::{InputError, ManagerError, OutputError};
pub use guard::{ConnectionGuard, Connector, Handle};
pub use handler::{DynOutput, Output, OutputHandler, SinkVariant};
pub use manager::{InstanceInfo, IoManager, forward};
pub use pool::{PoolKey, SharedPool};
pub use sink::{OutputContext, OutputFactory, build_output, register_builtin_outputs};
pub use source::{DynInput, Input, InputContext, InputFactory, build_input, register_builtin_inputs};
pub use state::InstanceState;
