//! TCP source with newline framing.
//!
//! Each accepted connection runs in its own task, bounded by a semaphore
//! of `max_connections` permits. A connection idle for longer than
//! `connection_timeout_secs` or sending a frame over `max_message_size`
//! is dropped. On close, connection tasks are cancelled and awaited before
//! the source reports Closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use logferry_core::config::Params;
use logferry_core::message::Message;
use logferry_core::metrics::{INPUT_FRAMES_DISCARDED_TOTAL, INPUT_MESSAGES_RECEIVED_TOTAL, LABEL_INPUT};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;

use super::{Input, InputContext, SOURCE_ATTRIBUTE};
use crate::error::InputError;
use crate::state::{InstanceState, Lifecycle};

const KIND: &str = "tcp";

#[derive(Debug, Clone)]
struct ConnectionLimits {
    max_message_size: usize,
    idle_timeout: Duration,
}

pub struct TcpInput {
    bind: String,
    max_connections: usize,
    limits: ConnectionLimits,
    tx: mpsc::Sender<Message>,
    local_addr: Mutex<Option<SocketAddr>>,
    lifecycle: Lifecycle,
}

impl TcpInput {
    /// Params: `bind` (required), `max_connections` (1..=65536, default 256),
    /// `max_message_size` (default 1 MiB), `connection_timeout_secs`
    /// (default 300).
    pub fn from_params(ctx: &InputContext, params: &Params) -> Result<Self, InputError> {
        Ok(Self {
            bind: params.require_str("bind")?.to_owned(),
            max_connections: params.get_usize_in_range("max_connections", 256, 1..=65_536)?,
            limits: ConnectionLimits {
                max_message_size: params.get_usize_in_range(
                    "max_message_size",
                    1024 * 1024,
                    1..=16 * 1024 * 1024,
                )?,
                idle_timeout: Duration::from_secs(params.get_u64_in_range(
                    "connection_timeout_secs",
                    300,
                    1..=86_400,
                )?),
            },
            tx: ctx.sender(),
            local_addr: Mutex::new(None),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub async fn run(&self) -> Result<(), InputError> {
        if !self.lifecycle.begin_run() {
            return Err(InputError::AlreadyRunning(self.name()));
        }
        let result = self.accept_loop().await;
        self.lifecycle.finish();
        match &result {
            Ok(()) => tracing::info!(input = %self.name(), "tcp source closed"),
            Err(e) => tracing::error!(input = %self.name(), error = %e, "tcp source stopped"),
        }
        result
    }

    async fn accept_loop(&self) -> Result<(), InputError> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| InputError::Bind {
                addr: self.bind.clone(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr().ok();
        *self.local_addr.lock() = local;
        tracing::info!(
            input = %self.name(),
            local_addr = ?local,
            max_connections = self.max_connections,
            "tcp source listening"
        );

        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = self.lifecycle.shutdown_requested() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(input = %self.name(), error = %e, "accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                        tracing::warn!(peer = %peer, max = self.max_connections, "connection limit reached, rejecting");
                        continue;
                    };

                    tracing::debug!(peer = %peer, "accepted connection");
                    let tx = self.tx.clone();
                    let limits = self.limits.clone();
                    let cancel = self.lifecycle.child_token();
                    connections.spawn(async move {
                        if let Err(e) = read_frames(stream, peer, tx, limits, cancel).await {
                            tracing::debug!(peer = %peer, error = %e, "connection ended");
                        }
                        drop(permit);
                    });
                }
            }
        }

        // child tokens are already cancelled
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

async fn read_frames(
    stream: TcpStream,
    peer: SocketAddr,
    tx: mpsc::Sender<Message>,
    limits: ConnectionLimits,
    cancel: CancellationToken,
) -> Result<(), InputError> {
    let source = format!("{KIND}:{peer}");
    // one extra byte for a trailing '\r'
    let codec = AnyDelimiterCodec::new_with_max_length(
        b"\n".to_vec(),
        Vec::new(),
        limits.max_message_size.saturating_add(1),
    );
    let mut frames = FramedRead::new(stream, codec);

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            read = timeout(limits.idle_timeout, frames.next()) => read,
        };

        let frame = match read {
            Ok(None) => return Ok(()),
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                metrics::counter!(INPUT_FRAMES_DISCARDED_TOTAL, LABEL_INPUT => KIND).increment(1);
                return Err(InputError::Receive {
                    source_name: source,
                    reason: format!(
                        "frame exceeds max_message_size {}",
                        limits.max_message_size
                    ),
                });
            }
            Ok(Some(Err(e))) => {
                return Err(InputError::Receive {
                    source_name: source,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(InputError::Receive {
                    source_name: source,
                    reason: "idle timeout".to_owned(),
                });
            }
        };

        let frame = frame.strip_suffix(b"\r").unwrap_or(&frame[..]);
        if frame.len() > limits.max_message_size {
            metrics::counter!(INPUT_FRAMES_DISCARDED_TOTAL, LABEL_INPUT => KIND).increment(1);
            return Err(InputError::Receive {
                source_name: source,
                reason: format!(
                    "frame of {} bytes exceeds max_message_size {}",
                    frame.len(),
                    limits.max_message_size
                ),
            });
        }
        if frame.is_empty() {
            continue;
        }

        let message =
            Message::new(Bytes::copy_from_slice(frame)).with_attribute(SOURCE_ATTRIBUTE, source.as_str());
        tx.send(message).await.map_err(|_| InputError::ChannelClosed)?;
        metrics::counter!(INPUT_MESSAGES_RECEIVED_TOTAL, LABEL_INPUT => KIND).increment(1);
    }
}

impl Input for TcpInput {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> String {
        format!("{KIND}:{}", self.bind)
    }

    fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    fn close(&self) -> bool {
        self.lifecycle.request_close()
    }

    async fn run(&self) -> Result<(), InputError> {
        TcpInput::run(self).await
    }

    async fn wait_closed(&self) {
        self.lifecycle.closed().await;
    }
}
