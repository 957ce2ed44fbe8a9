//! Pipeline error types.
//!
//! [`OutputError`] covers everything on the output path: construction,
//! routing, connection handling and sending. Nothing in the send loop
//! returns these to an enqueuing caller; they are logged and counted.
//! [`InputError`] and [`ManagerError`] cover sources and instance lookup.

use logferry_core::error::{CodecError, ConfigError, RegistryError};

/// Output path errors.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Invalid or missing parameter at construction time
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown output type
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Establishing a backend connection or client failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// The health probe issued after connecting failed
    #[error("health probe failed: {0}")]
    Probe(String),

    /// The backend rejected or failed a send
    #[error("send to '{destination}' failed: {reason}")]
    Send { destination: String, reason: String },

    /// A panic caught at the connection fault boundary
    #[error("fault during {operation}: {message}")]
    Fault {
        operation: &'static str,
        message: String,
    },

    /// Payload is not valid JSON (dynamic destinations only)
    #[error("payload is not valid JSON: {0}")]
    Decode(String),

    /// The destination expression could not be evaluated
    #[error("destination evaluation failed: {0}")]
    Evaluate(String),

    /// Compression failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// `run()` was called twice on the same instance
    #[error("output '{0}' is already running")]
    AlreadyRunning(String),

    /// The guard or handler has been closed
    #[error("output '{0}' is closed")]
    Closed(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutputError {
    /// Shorthand for [`OutputError::Send`].
    pub fn send(destination: impl Into<String>, reason: impl ToString) -> Self {
        Self::Send {
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors raised while talking to a backend; these invalidate
    /// the connection handle.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Probe(_) | Self::Send { .. } | Self::Fault { .. } | Self::Io(_)
        )
    }
}

/// Source errors.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Invalid or missing parameter at construction time
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown input type
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Binding the listening socket failed
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// Socket error while receiving
    #[error("receive error on {source_name}: {reason}")]
    Receive { source_name: String, reason: String },

    /// The dispatcher channel is gone
    #[error("channel closed")]
    ChannelClosed,

    /// `run()` was called twice on the same instance
    #[error("input '{0}' is already running")]
    AlreadyRunning(String),
}

/// Instance lookup errors, surfaced by the administrative façade.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Blank identifier
    #[error("{category} id is blank")]
    BlankId { category: &'static str },

    /// No instance with that identifier
    #[error("{category} not found: {id}")]
    NotFound { category: &'static str, id: String },
}
