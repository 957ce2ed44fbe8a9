//! Console sink: one payload per line on stdout or stderr.

use logferry_core::config::Params;
use logferry_core::error::ConfigError;
use logferry_core::message::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::OutputError;
use crate::guard::{Connector, Handle};
use crate::handler::SinkVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub struct StdoutSink {
    stream: Stream,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

impl StdoutSink {
    /// Params: `target` = `stdout` (default) or `stderr`.
    pub fn from_params(params: &Params) -> Result<Self, OutputError> {
        let stream = match params.get_string_or("target", "stdout")?.trim() {
            "stdout" => Stream::Stdout,
            "stderr" => Stream::Stderr,
            other => {
                return Err(ConfigError::invalid("target", format!("'{other}' is not stdout or stderr")).into());
            }
        };
        Ok(Self { stream })
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }
}

impl Connector for StdoutSink {
    type Client = Mutex<Writer>;

    async fn connect(&self) -> Result<Handle<Self::Client>, OutputError> {
        let writer: Writer = match self.stream {
            Stream::Stdout => Box::new(tokio::io::stdout()),
            Stream::Stderr => Box::new(tokio::io::stderr()),
        };
        Ok(Handle::owned(Mutex::new(writer)))
    }

    async fn close_client(&self, client: &Self::Client) -> Result<(), OutputError> {
        client.lock().await.flush().await?;
        Ok(())
    }
}

impl SinkVariant for StdoutSink {
    fn kind(&self) -> &'static str {
        "stdout"
    }

    fn name(&self) -> String {
        match self.stream {
            Stream::Stdout => "stdout".to_owned(),
            Stream::Stderr => "stderr".to_owned(),
        }
    }

    async fn send_batch(
        &self,
        client: &Self::Client,
        messages: &[Message],
        destination: &str,
    ) -> Result<(), OutputError> {
        let mut out = client.lock().await;
        for message in messages {
            out.write_all(message.payload())
                .await
                .map_err(|e| OutputError::send(destination, e))?;
            out.write_all(b"\n")
                .await
                .map_err(|e| OutputError::send(destination, e))?;
        }
        out.flush().await.map_err(|e| OutputError::send(destination, e))
    }
}
