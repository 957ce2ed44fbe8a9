//! Configuration: `logferry.toml` parsing and runtime settings.
//!
//! [`LogferryConfig`] is the top-level structure. Daemon-wide sections are
//! typed; each `[[inputs]]` / `[[outputs]]` table carries a `type` plus
//! free-form parameters that the matching factory reads through [`Params`].
//!
//! # Loading order
//! 1. CLI arguments (highest)
//! 2. Environment variables (`LOGFERRY_ADMIN_PORT=8081`)
//! 3. Config file (`logferry.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), logferry_core::error::LogferryError> {
//! use logferry_core::config::LogferryConfig;
//!
//! let config = LogferryConfig::load("logferry.toml").await?;
//! for output in &config.outputs {
//!     println!("output type: {}", output.kind);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogferryError};

/// Top-level logferry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogferryConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Administrative HTTP façade
    #[serde(default)]
    pub admin: AdminConfig,
    /// Prometheus exporter
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Source definitions
    #[serde(default)]
    pub inputs: Vec<InOutDefinition>,
    /// Sink definitions
    #[serde(default)]
    pub outputs: Vec<InOutDefinition>,
}

impl LogferryConfig {
    /// Loads the file, applies environment overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogferryError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads the file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogferryError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogferryError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogferryError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, LogferryError> {
        toml::from_str(toml_str).map_err(|e| {
            LogferryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Overrides typed settings from the environment.
    ///
    /// Naming rule: `LOGFERRY_{SECTION}_{FIELD}`, e.g. `LOGFERRY_GENERAL_LOG_LEVEL=debug`.
    /// Input and output tables are not overridable.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "LOGFERRY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGFERRY_GENERAL_LOG_FORMAT");
        override_u64(
            &mut self.general.shutdown_timeout_secs,
            "LOGFERRY_GENERAL_SHUTDOWN_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.general.channel_capacity,
            "LOGFERRY_GENERAL_CHANNEL_CAPACITY",
        );

        override_bool(&mut self.admin.enabled, "LOGFERRY_ADMIN_ENABLED");
        override_string(&mut self.admin.listen_addr, "LOGFERRY_ADMIN_LISTEN_ADDR");
        override_u16(&mut self.admin.port, "LOGFERRY_ADMIN_PORT");

        override_bool(&mut self.metrics.enabled, "LOGFERRY_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "LOGFERRY_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "LOGFERRY_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "LOGFERRY_METRICS_ENDPOINT");
    }

    /// Validates daemon-wide settings and the shape of every input/output
    /// table. Per-kind parameters are validated by the factories.
    pub fn validate(&self) -> Result<(), LogferryError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            )
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            )
            .into());
        }

        if self.general.channel_capacity == 0 {
            return Err(ConfigError::invalid("general.channel_capacity", "must be > 0").into());
        }

        if self.admin.enabled && self.admin.port == 0 {
            return Err(ConfigError::invalid("admin.port", "must be > 0 when enabled").into());
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(
                    ConfigError::invalid("metrics.port", "must be > 0 when enabled").into(),
                );
            }
            if !self.metrics.endpoint.starts_with('/') {
                return Err(
                    ConfigError::invalid("metrics.endpoint", "must start with '/'").into(),
                );
            }
        }

        for (idx, def) in self.inputs.iter().enumerate() {
            if def.kind.trim().is_empty() {
                return Err(ConfigError::missing(format!("inputs[{idx}].type")).into());
            }
        }
        for (idx, def) in self.outputs.iter().enumerate() {
            if def.kind.trim().is_empty() {
                return Err(ConfigError::missing(format!("outputs[{idx}].type")).into());
            }
        }

        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
    /// How long shutdown waits for instances to finish their final flush
    pub shutdown_timeout_secs: u64,
    /// Capacity of the input → dispatcher channel
    pub channel_capacity: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            shutdown_timeout_secs: 30,
            channel_capacity: 10_000,
        }
    }
}

/// Administrative HTTP façade settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 8081,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// One `[[inputs]]` or `[[outputs]]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InOutDefinition {
    /// Registry name of the kind, e.g. `"file"` or `"webhook"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Every other key of the table
    #[serde(flatten)]
    pub params: Params,
}

impl InOutDefinition {
    /// Builds a definition in code.
    pub fn new(kind: impl Into<String>, params: Params) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

// ─── Params ──────────────────────────────────────────────────────────

/// Free-form instance parameters with typed accessors.
///
/// Absent keys fall back to the supplied default; present keys with an
/// unusable value are a [`ConfigError`]. Numeric and boolean accessors
/// also accept their string spelling (`"100"`, `"true"`), which lets the
/// same table come from environment-driven templating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(toml::Table);

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and programmatic setup.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts or replaces one value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<toml::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// True when the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Raw value.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.0.get(key)
    }

    /// String value, `None` when absent or not a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(toml::Value::as_str)
    }

    /// String value or `default` when absent.
    pub fn get_string_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.0.get(key) {
            None => Ok(default.to_owned()),
            Some(toml::Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(ConfigError::invalid(
                key,
                format!("expected a string, got {}", other.type_str()),
            )),
        }
    }

    /// Required non-blank string. The value is returned trimmed.
    pub fn require_str(&self, key: &str) -> Result<&str, ConfigError> {
        match self.0.get(key) {
            None => Err(ConfigError::missing(key)),
            Some(toml::Value::String(s)) if s.trim().is_empty() => Err(ConfigError::missing(key)),
            Some(toml::Value::String(s)) => Ok(s.trim()),
            Some(other) => Err(ConfigError::invalid(
                key,
                format!("expected a string, got {}", other.type_str()),
            )),
        }
    }

    /// Boolean value or `default` when absent.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.0.get(key) {
            None => Ok(default),
            Some(toml::Value::Boolean(b)) => Ok(*b),
            Some(toml::Value::String(s)) => s
                .trim()
                .parse::<bool>()
                .map_err(|_| ConfigError::invalid(key, format!("'{s}' is not a boolean"))),
            Some(other) => Err(ConfigError::invalid(
                key,
                format!("expected a boolean, got {}", other.type_str()),
            )),
        }
    }

    /// Unsigned integer within `range`, or `default` when absent.
    ///
    /// The default itself is not range-checked.
    pub fn get_u64_in_range(
        &self,
        key: &str,
        default: u64,
        range: RangeInclusive<u64>,
    ) -> Result<u64, ConfigError> {
        let value = match self.0.get(key) {
            None => return Ok(default),
            Some(toml::Value::Integer(i)) => u64::try_from(*i)
                .map_err(|_| ConfigError::invalid(key, format!("{i} must not be negative")))?,
            Some(toml::Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::invalid(key, format!("'{s}' is not an integer")))?,
            Some(other) => {
                return Err(ConfigError::invalid(
                    key,
                    format!("expected an integer, got {}", other.type_str()),
                ));
            }
        };

        if !range.contains(&value) {
            return Err(ConfigError::invalid(
                key,
                format!(
                    "{value} out of range ({}-{})",
                    range.start(),
                    range.end()
                ),
            ));
        }
        Ok(value)
    }

    /// Same as [`get_u64_in_range`](Self::get_u64_in_range), as `usize`.
    pub fn get_usize_in_range(
        &self,
        key: &str,
        default: usize,
        range: RangeInclusive<usize>,
    ) -> Result<usize, ConfigError> {
        let widen = |v: usize| u64::try_from(v).unwrap_or(u64::MAX);
        let value = self.get_u64_in_range(
            key,
            widen(default),
            widen(*range.start())..=widen(*range.end()),
        )?;
        usize::try_from(value).map_err(|_| ConfigError::invalid(key, "value too large"))
    }

    /// Millisecond duration within `range_ms`, or `default_ms` when absent.
    pub fn get_duration_ms(
        &self,
        key: &str,
        default_ms: u64,
        range_ms: RangeInclusive<u64>,
    ) -> Result<Duration, ConfigError> {
        self.get_u64_in_range(key, default_ms, range_ms)
            .map(Duration::from_millis)
    }

    /// Collects every parameter under `prefix` with the prefix stripped.
    ///
    /// Both spellings are accepted: a quoted key `"attribute.env" = "prod"`
    /// and a dotted key `attribute.env = "prod"` (which TOML stores as a
    /// nested table). Non-string scalars are rendered with their TOML
    /// display form.
    pub fn prefixed(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let table_key = prefix.trim_end_matches('.');

        for (key, value) in &self.0 {
            if let Some(name) = key.strip_prefix(prefix) {
                if !name.is_empty() {
                    out.insert(name.to_owned(), scalar_to_string(value));
                }
            } else if key == table_key {
                if let toml::Value::Table(nested) = value {
                    for (name, value) in nested {
                        out.insert(name.clone(), scalar_to_string(value));
                    }
                }
            }
        }
        out
    }

    /// Parameter names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn scalar_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_passes_validation() {
        let config = LogferryConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.admin.enabled);
        assert!(config.outputs.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_inputs_and_outputs_with_free_form_params() {
        let toml = r#"
[general]
log_level = "debug"

[[inputs]]
type = "udp"
bind = "127.0.0.1:5140"

[[outputs]]
type = "file"
path = "/var/log/ferry/{{$.tenant}}.log"
chunk_size = 50
compressed = true
attribute.env = "prod"
"#;
        let config = LogferryConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.inputs[0].kind, "udp");
        assert_eq!(config.inputs[0].params.get_str("bind"), Some("127.0.0.1:5140"));

        let out = &config.outputs[0];
        assert_eq!(out.kind, "file");
        assert!(!out.params.contains("type"));
        assert_eq!(
            out.params.get_u64_in_range("chunk_size", 100, 1..=1000).unwrap(),
            50
        );
        assert!(out.params.get_bool("compressed", false).unwrap());
        assert_eq!(
            out.params.prefixed("attribute.").get("env").map(String::as_str),
            Some("prod")
        );
    }

    #[test]
    fn parse_invalid_toml_returns_error() {
        let err = LogferryConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            LogferryError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = LogferryConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_blank_output_type() {
        let mut config = LogferryConfig::default();
        config.outputs.push(InOutDefinition::new(" ", Params::new()));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("outputs[0].type"));
    }

    #[test]
    fn validate_rejects_zero_admin_port_when_enabled() {
        let mut config = LogferryConfig::default();
        config.admin.enabled = true;
        config.admin.port = 0;
        assert!(config.validate().is_err());

        config.admin.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn require_str_rejects_missing_blank_and_wrong_type() {
        let params = Params::new()
            .with("server", "  ")
            .with("port", 6379_i64)
            .with("name", " events ");

        assert!(matches!(
            params.require_str("absent"),
            Err(ConfigError::MissingParam { .. })
        ));
        assert!(matches!(
            params.require_str("server"),
            Err(ConfigError::MissingParam { .. })
        ));
        assert!(matches!(
            params.require_str("port"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(params.require_str("name").unwrap(), "events");
    }

    #[test]
    fn u64_range_accepts_strings_and_rejects_out_of_range() {
        let params = Params::new()
            .with("a", "42")
            .with("b", 0_i64)
            .with("c", -1_i64)
            .with("d", "many");

        assert_eq!(params.get_u64_in_range("a", 1, 1..=100).unwrap(), 42);
        assert_eq!(params.get_u64_in_range("missing", 7, 1..=100).unwrap(), 7);

        let err = params.get_u64_in_range("b", 1, 1..=100).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(params.get_u64_in_range("c", 1, 0..=100).is_err());
        assert!(params.get_u64_in_range("d", 1, 0..=100).is_err());
    }

    #[test]
    fn duration_ms_is_converted() {
        let params = Params::new().with("flush_interval_ms", 250_i64);
        assert_eq!(
            params
                .get_duration_ms("flush_interval_ms", 1000, 10..=60_000)
                .unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn bool_accepts_string_spelling() {
        let params = Params::new().with("x", "true").with("y", "maybe");
        assert!(params.get_bool("x", false).unwrap());
        assert!(params.get_bool("y", false).is_err());
        assert!(params.get_bool("z", true).unwrap());
    }

    #[test]
    fn prefixed_collects_quoted_keys_and_renders_scalars() {
        let params = Params::new()
            .with("attribute.team", "infra")
            .with("attribute.shard", 3_i64)
            .with("other", "x");
        let attrs = params.prefixed("attribute.");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["team"], "infra");
        assert_eq!(attrs["shard"], "3");
    }

    #[test]
    fn config_serializes_to_json_with_type_key() {
        let mut config = LogferryConfig::default();
        config.outputs.push(InOutDefinition::new(
            "stdout",
            Params::new().with("chunk_size", 10_i64),
        ));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["outputs"][0]["type"], "stdout");
        assert_eq!(json["outputs"][0]["chunk_size"], 10);
    }

    #[test]
    #[serial]
    fn env_override_admin_port_and_enabled() {
        let mut config = LogferryConfig::default();
        // SAFETY: serialized with the other env tests.
        unsafe {
            std::env::set_var("LOGFERRY_ADMIN_ENABLED", "true");
            std::env::set_var("LOGFERRY_ADMIN_PORT", "9999");
        }
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("LOGFERRY_ADMIN_ENABLED");
            std::env::remove_var("LOGFERRY_ADMIN_PORT");
        }
        assert!(config.admin.enabled);
        assert_eq!(config.admin.port, 9999);
    }

    #[test]
    #[serial]
    fn env_override_invalid_value_keeps_original() {
        let mut val = 8081_u16;
        // SAFETY: serialized with the other env tests.
        unsafe { std::env::set_var("TEST_LOGFERRY_PORT_BAD", "not-a-port") };
        override_u16(&mut val, "TEST_LOGFERRY_PORT_BAD");
        unsafe { std::env::remove_var("TEST_LOGFERRY_PORT_BAD") };
        assert_eq!(val, 8081);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = LogferryConfig::from_file("/nonexistent/path/logferry.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LogferryError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
