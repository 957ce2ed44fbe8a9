//! UDP source.
//!
//! One datagram may carry several newline-separated frames. Frames longer
//! than `max_message_size` are discarded.

use std::net::SocketAddr;

use bytes::Bytes;
use logferry_core::config::Params;
use logferry_core::message::Message;
use logferry_core::metrics::{INPUT_FRAMES_DISCARDED_TOTAL, INPUT_MESSAGES_RECEIVED_TOTAL, LABEL_INPUT};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{Input, InputContext, SOURCE_ATTRIBUTE};
use crate::error::InputError;
use crate::state::{InstanceState, Lifecycle};

const KIND: &str = "udp";
const MAX_DATAGRAM: usize = 65_536;
const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_536;

pub struct UdpInput {
    bind: String,
    max_message_size: usize,
    tx: mpsc::Sender<Message>,
    local_addr: Mutex<Option<SocketAddr>>,
    lifecycle: Lifecycle,
}

impl UdpInput {
    /// Params: `bind` (required), `max_message_size` (1..=65536).
    pub fn from_params(ctx: &InputContext, params: &Params) -> Result<Self, InputError> {
        Ok(Self {
            bind: params.require_str("bind")?.to_owned(),
            max_message_size: params.get_usize_in_range(
                "max_message_size",
                DEFAULT_MAX_MESSAGE_SIZE,
                1..=MAX_DATAGRAM,
            )?,
            tx: ctx.sender(),
            local_addr: Mutex::new(None),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Bound address, once `run()` has bound the socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub async fn run(&self) -> Result<(), InputError> {
        if !self.lifecycle.begin_run() {
            return Err(InputError::AlreadyRunning(self.name()));
        }
        let result = self.receive_loop().await;
        self.lifecycle.finish();
        if let Err(e) = &result {
            tracing::error!(input = %self.name(), error = %e, "udp source stopped");
        } else {
            tracing::info!(input = %self.name(), "udp source closed");
        }
        result
    }

    async fn receive_loop(&self) -> Result<(), InputError> {
        let socket = UdpSocket::bind(&self.bind)
            .await
            .map_err(|e| InputError::Bind {
                addr: self.bind.clone(),
                reason: e.to_string(),
            })?;
        let local = socket.local_addr().ok();
        *self.local_addr.lock() = local;
        tracing::info!(input = %self.name(), local_addr = ?local, "udp source listening");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                biased;
                () = self.lifecycle.shutdown_requested() => return Ok(()),
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.forward_datagram(&buf[..len], peer).await?,
                    Err(e) => {
                        tracing::warn!(input = %self.name(), error = %e, "udp receive failed");
                    }
                },
            }
        }
    }

    async fn forward_datagram(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), InputError> {
        let source = format!("{KIND}:{peer}");
        for frame in datagram.split(|b| *b == b'\n') {
            let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
            if frame.is_empty() {
                continue;
            }
            if frame.len() > self.max_message_size {
                metrics::counter!(INPUT_FRAMES_DISCARDED_TOTAL, LABEL_INPUT => KIND).increment(1);
                tracing::warn!(
                    peer = %peer,
                    size = frame.len(),
                    max = self.max_message_size,
                    "frame exceeds max_message_size, discarded"
                );
                continue;
            }

            let message =
                Message::new(Bytes::copy_from_slice(frame)).with_attribute(SOURCE_ATTRIBUTE, source.as_str());
            self.tx
                .send(message)
                .await
                .map_err(|_| InputError::ChannelClosed)?;
            metrics::counter!(INPUT_MESSAGES_RECEIVED_TOTAL, LABEL_INPUT => KIND).increment(1);
        }
        Ok(())
    }
}

impl Input for UdpInput {
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
        UdpInput::run(self).await
    }

    async fn wait_closed(&self) {
        self.lifecycle.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    async fn started(max_message_size: i64) -> (Arc<UdpInput>, mpsc::Receiver<Message>, SocketAddr) {
        let (tx, rx) = mpsc::channel(16);
        let params = Params::new()
            .with("bind", "127.0.0.1:0")
            .with("max_message_size", max_message_size);
        let input = Arc::new(UdpInput::from_params(&InputContext::new(tx), &params).unwrap());
        {
            let input = Arc::clone(&input);
            tokio::spawn(async move { input.run().await });
        }
        let addr = loop {
            if let Some(addr) = input.local_addr() {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        (input, rx, addr)
    }

    #[tokio::test]
    async fn splits_datagram_into_messages() {
        let (input, mut rx, addr) = started(1024).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"first\r\nsecond\n\n", addr).await.unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.payload().as_ref(), b"first");
        assert_eq!(b.payload().as_ref(), b"second");
        assert!(a.attribute(SOURCE_ATTRIBUTE).unwrap().starts_with("udp:127.0.0.1:"));

        input.close();
        input.wait_closed().await;
        assert_eq!(input.state(), InstanceState::Closed);
    }

    #[tokio::test]
    async fn oversized_frames_are_discarded() {
        let (input, mut rx, addr) = started(4).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"toolong\nok\n", addr).await.unwrap();

        let only = rx.recv().await.unwrap();
        assert_eq!(only.payload().as_ref(), b"ok");
        input.close();
    }

    #[test]
    fn rejects_out_of_range_size() {
        let (tx, _rx) = mpsc::channel(1);
        let params = Params::new()
            .with("bind", "127.0.0.1:0")
            .with("max_message_size", 0);
        assert!(matches!(
            UdpInput::from_params(&InputContext::new(tx), &params),
            Err(InputError::Config(_))
        ));
    }
}
