//! TCP sink: newline-framed payloads over one stream per instance.

use std::time::Duration;

use logferry_core::config::Params;
use logferry_core::message::Message;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::OutputError;
use crate::guard::{Connector, Handle};
use crate::handler::SinkVariant;

pub struct TcpSink {
    server: String,
    dial_timeout: Duration,
}

impl TcpSink {
    /// Params: `server` (`host:port`, required), `dial_timeout_ms`
    /// (10..=60000, default 5000).
    pub fn from_params(params: &Params) -> Result<Self, OutputError> {
        Ok(Self {
            server: params.require_str("server")?.to_owned(),
            dial_timeout: params.get_duration_ms("dial_timeout_ms", 5000, 10..=60_000)?,
        })
    }
}

impl Connector for TcpSink {
    type Client = Mutex<BufWriter<TcpStream>>;

    async fn connect(&self) -> Result<Handle<Self::Client>, OutputError> {
        let stream = timeout(self.dial_timeout, TcpStream::connect(&self.server))
            .await
            .map_err(|_| OutputError::Connect(format!("dial {} timed out", self.server)))?
            .map_err(|e| OutputError::Connect(format!("dial {}: {e}", self.server)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(server = %self.server, error = %e, "failed to set TCP_NODELAY");
        }
        Ok(Handle::owned(Mutex::new(BufWriter::new(stream))))
    }

    async fn close_client(&self, client: &Self::Client) -> Result<(), OutputError> {
        let mut stream = client.lock().await;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}

impl SinkVariant for TcpSink {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn name(&self) -> String {
        format!("tcp:{}", self.server)
    }

    async fn send_batch(
        &self,
        client: &Self::Client,
        messages: &[Message],
        destination: &str,
    ) -> Result<(), OutputError> {
        let mut stream = client.lock().await;
        for message in messages {
            stream
                .write_all(message.payload())
                .await
                .map_err(|e| OutputError::send(destination, e))?;
            stream
                .write_all(b"\n")
                .await
                .map_err(|e| OutputError::send(destination, e))?;
        }
        stream.flush().await.map_err(|e| OutputError::send(destination, e))
    }
}
