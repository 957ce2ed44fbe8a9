//! Settings shared by every output instance.
//!
//! Each `[[outputs]]` table carries these keys next to the sink-specific
//! ones; [`HandlerSettings::from_params`] reads and validates them.
//!
//! ```ignore
//! let settings = HandlerSettings::from_params(&definition.params)?;
//! let handler = OutputHandler::new(variant, settings);
//! ```

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use logferry_core::codec::Codec;
use logferry_core::config::Params;
use logferry_core::error::ConfigError;
use serde::Serialize;

/// Messages per send call.
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Time trigger.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1_000;
/// Messages held before the drop policy applies.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// What to drop when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Evict the oldest buffered message and accept the new one
    #[default]
    Oldest,
    /// Reject the incoming message
    Newest,
}

impl FromStr for DropPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest" => Ok(Self::Oldest),
            "newest" => Ok(Self::Newest),
            other => Err(ConfigError::invalid(
                "drop_policy",
                format!("'{other}' must be one of: oldest, newest"),
            )),
        }
    }
}

/// Batching, compression and retry settings of one output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerSettings {
    /// Size trigger and maximum messages per send call
    pub chunk_size: usize,
    /// Time trigger
    pub flush_interval: Duration,
    /// Buffer bound
    pub buffer_capacity: usize,
    pub drop_policy: DropPolicy,
    /// `None` when `compressed = false`
    pub compression: Option<Codec>,
    /// Immediate reconnect-and-resend attempts for a failed group
    pub retry_attempts: u32,
    /// Attached to every message at send time
    pub attributes: BTreeMap<String, String>,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            drop_policy: DropPolicy::Oldest,
            compression: None,
            retry_attempts: 0,
            attributes: BTreeMap::new(),
        }
    }
}

impl HandlerSettings {
    /// Reads the shared keys of an `[[outputs]]` table.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let chunk_size = params.get_usize_in_range("chunk_size", DEFAULT_CHUNK_SIZE, 1..=100_000)?;
        let flush_interval = params.get_duration_ms(
            "flush_interval_ms",
            DEFAULT_FLUSH_INTERVAL_MS,
            10..=3_600_000,
        )?;
        let buffer_capacity = params.get_usize_in_range(
            "buffer_capacity",
            DEFAULT_BUFFER_CAPACITY,
            1..=10_000_000,
        )?;
        let drop_policy = params
            .get_string_or("drop_policy", "oldest")?
            .parse::<DropPolicy>()?;

        let compression = if params.get_bool("compressed", false)? {
            let name = params.get_string_or("compression", "gzip")?;
            let codec = name
                .parse::<Codec>()
                .map_err(|e| ConfigError::invalid("compression", e.to_string()))?;
            Some(codec)
        } else {
            None
        };

        let retry_attempts = params.get_u64_in_range("retry_attempts", 0, 0..=10)?;
        let retry_attempts = u32::try_from(retry_attempts)
            .map_err(|_| ConfigError::invalid("retry_attempts", "value too large"))?;

        Ok(Self {
            chunk_size,
            flush_interval,
            buffer_capacity,
            drop_policy,
            compression,
            retry_attempts,
            attributes: params.prefixed("attribute."),
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize, policy: DropPolicy) -> Self {
        self.buffer_capacity = capacity.max(1);
        self.drop_policy = policy;
        self
    }

    pub fn with_compression(mut self, codec: Codec) -> Self {
        self.compression = Some(codec);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
