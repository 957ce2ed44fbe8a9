//! Shared building blocks for the logferry workspace.
//!
//! - [`message`]: [`Message`], [`Chunk`] and [`DestinationGroups`]
//! - [`config`]: `logferry.toml` loading and the [`Params`] accessor
//! - [`registry`]: name → factory table used for pluggable kinds
//! - [`codec`]: payload compression
//! - [`error`]: error taxonomy
//! - [`metrics`]: metric names

pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod registry;

pub use codec::{Codec, compress};
pub use config::{InOutDefinition, LogferryConfig, Params};
pub use error::{CodecError, ConfigError, LogferryError, RegistryError};
pub use message::{Chunk, DestinationGroup, DestinationGroups, Message};
pub use registry::Registry;
