//! HTTP sink: POSTs every message to a static or per-message URL.
//!
//! Message attributes are sent as request headers. With `pool_name` set,
//! all HTTP outputs naming the same pool, URL and token share one
//! `reqwest::Client`; the guard never closes a pooled client.
//!
//! When `health_url` is set, a HEAD request validates each new connection.
//! Success, redirect and client-error statuses count as healthy; only
//! server errors and transport failures fail the probe.

use std::sync::Arc;
use std::time::Duration;

use logferry_core::config::Params;
use logferry_core::error::ConfigError;
use logferry_core::message::Message;
use logferry_core::Codec;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderName, HeaderValue};

use crate::config::HandlerSettings;
use crate::destination::DestinationPath;
use crate::error::OutputError;
use crate::guard::{Connector, Handle};
use crate::handler::SinkVariant;
use crate::pool::{PoolKey, SharedPool};

use super::OutputContext;

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpSink {
    url: DestinationPath,
    health_url: Option<String>,
    timeout: Duration,
    bearer_token: Option<String>,
    content_type: String,
    content_encoding: Option<&'static str>,
    pool: Option<(Arc<SharedPool<Client>>, PoolKey)>,
}

impl HttpSink {
    /// Params: `url` (required), `timeout_ms` (100..=300000, default 5000),
    /// `health_url`, `bearer_token`, `pool_name`, `content_type`
    /// (default `application/json`).
    pub fn from_params(ctx: &OutputContext, params: &Params) -> Result<Self, OutputError> {
        let url = DestinationPath::from_param(params, "url")?;
        if let Some(fixed) = url.static_value() {
            validate_url("url", fixed)?;
        }

        let health_url = optional_str(params, "health_url")?;
        if let Some(health) = &health_url {
            validate_url("health_url", health)?;
        }

        let bearer_token = optional_str(params, "bearer_token")?;
        let pool = optional_str(params, "pool_name")?.map(|name| {
            let key = PoolKey::new(
                name,
                url.to_string(),
                bearer_token.clone().unwrap_or_default(),
            );
            (Arc::clone(&ctx.http_clients), key)
        });

        let content_encoding = HandlerSettings::from_params(params)?
            .compression
            .and_then(|codec| match codec {
                Codec::Gzip => Some("gzip"),
                Codec::Zlib => Some("deflate"),
                Codec::Lz4 => None,
            });

        Ok(Self {
            url,
            health_url,
            timeout: params.get_duration_ms("timeout_ms", DEFAULT_TIMEOUT_MS, 100..=300_000)?,
            bearer_token,
            content_type: params.get_string_or("content_type", "application/json")?,
            content_encoding,
            pool,
        })
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    fn build_client(&self) -> Result<Client, OutputError> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(MAX_CONNECT_TIMEOUT))
            .build()
            .map_err(|e| OutputError::Connect(format!("failed to build HTTP client: {e}")))
    }

    fn request(&self, client: &Client, message: &Message, url: &str) -> reqwest::RequestBuilder {
        let mut request = client
            .post(url)
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(message.payload().clone());
        if let Some(encoding) = self.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        for (key, value) in message.attributes() {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => request = request.header(name, value),
                _ => tracing::debug!(attribute = %key, "attribute is not a valid header, skipped"),
            }
        }
        request
    }
}

fn optional_str(params: &Params, key: &str) -> Result<Option<String>, ConfigError> {
    if !params.contains(key) {
        return Ok(None);
    }
    let value = params.get_string_or(key, "")?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_owned()))
}

fn validate_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = reqwest::Url::parse(raw).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::invalid(field, format!("unsupported scheme '{other}'"))),
    }
}

impl Connector for HttpSink {
    type Client = Client;

    async fn connect(&self) -> Result<Handle<Client>, OutputError> {
        match &self.pool {
            Some((pool, key)) => pool
                .get_or_try_insert_with(key.clone(), || self.build_client())
                .map(Handle::pooled),
            None => self.build_client().map(Handle::owned),
        }
    }

    async fn probe(&self, client: &Client) -> Result<(), OutputError> {
        let Some(url) = &self.health_url else {
            return Ok(());
        };
        let response = client
            .head(url)
            .send()
            .await
            .map_err(|e| OutputError::Probe(format!("HEAD {url}: {e}")))?;
        let status = response.status();
        if status.is_success() || status.is_redirection() || status.is_client_error() {
            Ok(())
        } else {
            Err(OutputError::Probe(format!("HEAD {url}: status {status}")))
        }
    }
}

impl SinkVariant for HttpSink {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn name(&self) -> String {
        format!("http:{}", self.url)
    }

    fn destination(&self) -> Option<&DestinationPath> {
        Some(&self.url)
    }

    async fn send_batch(
        &self,
        client: &Client,
        messages: &[Message],
        destination: &str,
    ) -> Result<(), OutputError> {
        for message in messages {
            let response = self
                .request(client, message, destination)
                .send()
                .await
                .map_err(|e| OutputError::send(destination, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(OutputError::send(destination, format!("status {status}")));
            }
        }
        Ok(())
    }
}
