//! Error types shared by every logferry crate.

/// Top-level logferry error.
#[derive(Debug, thiserror::Error)]
pub enum LogferryError {
    /// Configuration loading or validation failed
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Plugin registry lookup or registration failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Payload codec failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
///
/// Raised while loading the TOML file and while an input or output reads
/// its parameters. A sink whose construction fails with one of these is
/// never started.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// The configuration file is not valid TOML or does not match the schema
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A required parameter is absent or blank
    #[error("missing required parameter '{field}'")]
    MissingParam { field: String },

    /// A parameter is present but its value is unusable
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`ConfigError::MissingParam`].
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingParam {
            field: field.into(),
        }
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No factory is registered under the requested type name
    #[error("unknown {category} type: '{name}'")]
    UnknownKind { category: String, name: String },

    /// A registered name is empty or otherwise unusable
    #[error("invalid registry name: '{name}'")]
    InvalidName { name: String },
}

/// Compression codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The codec name is not supported
    #[error("unsupported compression codec: {0}")]
    Unsupported(String),

    /// The encoder failed
    #[error("compression failed: {0}")]
    Compress(String),
}
