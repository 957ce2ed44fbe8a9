//! Output handler: buffer, flush loop and lifecycle for one sink instance.
//!
//! Every sink variant plugs into [`OutputHandler`] through [`SinkVariant`];
//! the handler owns everything else.
//!
//! # Flush cycle
//! ```text
//! enqueue ─→ MessageBuffer ─(chunk_size reached | interval elapsed | close)─→ Chunk
//!   Chunk ─→ DestinationPath::partition ─→ per group:
//!       attach attributes → compress → guard.acquire → send_batch
//!                                                    └─ error → invalidate, retry or abandon
//! ```
//!
//! Nothing in the flush path returns an error to the caller: failures are
//! logged, counted and the loop carries on.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use logferry_core::codec::compress;
use logferry_core::message::{Chunk, Message};
use logferry_core::metrics::{
    LABEL_OUTPUT, LABEL_REASON, OUTPUT_BUFFER_SIZE, OUTPUT_FLUSH_DURATION_SECONDS,
    OUTPUT_MESSAGES_DROPPED_TOTAL, OUTPUT_MESSAGES_ENQUEUED_TOTAL, OUTPUT_MESSAGES_FLUSHED_TOTAL,
    OUTPUT_SEND_FAILURES_TOTAL,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::BoxFuture;
use crate::buffer::{MessageBuffer, Push};
use crate::config::HandlerSettings;
use crate::destination::{DestinationPath, Partition};
use crate::error::OutputError;
use crate::guard::{ConnectionGuard, Connector, GuardStats};
use crate::state::{InstanceState, Lifecycle};

/// Backend-specific part of an output.
///
/// [`Connector`] supplies the client; this trait adds the send call and
/// the destination. All batching, routing and fault handling lives in
/// [`OutputHandler`].
pub trait SinkVariant: Connector + 'static {
    /// Registered type name, used as metric label.
    fn kind(&self) -> &'static str;

    /// Human-readable name. Doubles as the destination when
    /// [`destination`](Self::destination) is `None`.
    fn name(&self) -> String;

    /// Per-message destination expression, if the backend has one.
    fn destination(&self) -> Option<&DestinationPath> {
        None
    }

    /// Sends one destination group. `messages` keep enqueue order.
    fn send_batch(
        &self,
        client: &Self::Client,
        messages: &[Message],
        destination: &str,
    ) -> impl Future<Output = Result<(), OutputError>> + Send;

    /// Called once after the final flush, before the connection is torn down.
    fn after_close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Counter snapshot for one output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub flushes: u64,
    pub send_failures: u64,
    pub connection: GuardStats,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    flushes: AtomicU64,
    send_failures: AtomicU64,
}

/// Generic output instance wrapping a [`SinkVariant`].
pub struct OutputHandler<V: SinkVariant> {
    variant: V,
    name: String,
    settings: HandlerSettings,
    guard: ConnectionGuard<V::Client>,
    buffer: Mutex<MessageBuffer>,
    lifecycle: Lifecycle,
    flush_needed: Notify,
    counters: Counters,
}

impl<V: SinkVariant> OutputHandler<V> {
    pub fn new(variant: V, settings: HandlerSettings) -> Self {
        let name = variant.name();
        Self {
            guard: ConnectionGuard::new(variant.kind(), name.clone()),
            buffer: Mutex::new(MessageBuffer::new(
                settings.buffer_capacity,
                settings.drop_policy,
            )),
            lifecycle: Lifecycle::new(),
            flush_needed: Notify::new(),
            counters: Counters::default(),
            variant,
            name,
            settings,
        }
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            connection: self.guard.stats(),
        }
    }

    /// Buffers one message. Returns `false` when it was not stored:
    /// the handler is draining or closed, or the buffer rejected it.
    pub fn enqueue(&self, message: Message) -> bool {
        let kind = self.variant.kind();
        // the state lock is held across the push so close() cannot slip
        // between the check and the final flush
        let outcome = self.lifecycle.with_state(|state| {
            if !state.accepts_messages() {
                return None;
            }
            let mut buffer = self.buffer.lock();
            let outcome = buffer.push(message);
            Some((outcome, buffer.len()))
        });

        let Some((outcome, buffered)) = outcome else {
            self.count_dropped("closed", 1);
            tracing::debug!(output = %self.name, "output is closing, message discarded");
            return false;
        };

        match outcome {
            Push::Accepted => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(OUTPUT_MESSAGES_ENQUEUED_TOTAL, LABEL_OUTPUT => kind).increment(1);
                metrics::gauge!(OUTPUT_BUFFER_SIZE, LABEL_OUTPUT => kind).increment(1.0);
            }
            Push::EvictedOldest => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(OUTPUT_MESSAGES_ENQUEUED_TOTAL, LABEL_OUTPUT => kind).increment(1);
                self.count_dropped("buffer_full", 1);
            }
            Push::Rejected => {
                self.count_dropped("buffer_full", 1);
                return false;
            }
        }

        if buffered >= self.settings.chunk_size {
            self.flush_needed.notify_one();
        }
        true
    }

    /// Requests shutdown. Only the first call has an effect; the run loop
    /// finishes its current flush, flushes what is left and tears down.
    pub fn close(&self) -> bool {
        let first = self.lifecycle.request_close();
        if first {
            tracing::info!(output = %self.name, "close requested");
        }
        first
    }

    pub fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    /// Drives the flush loop until [`close`](Self::close) is called, then
    /// drains and tears down. Returns once the instance is Closed.
    pub async fn run(&self) -> Result<(), OutputError> {
        if !self.lifecycle.begin_run() {
            return Err(OutputError::AlreadyRunning(self.name.clone()));
        }

        tracing::info!(
            output = %self.name,
            kind = self.variant.kind(),
            chunk_size = self.settings.chunk_size,
            flush_interval_ms = u64::try_from(self.settings.flush_interval.as_millis()).unwrap_or(u64::MAX),
            dynamic = self.variant.destination().is_some_and(|d| !d.is_static()),
            "output started"
        );

        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.lifecycle.shutdown_requested() => break,
                () = self.flush_needed.notified() => {
                    self.flush_ready().await;
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    self.flush_all().await;
                }
            }
        }

        tracing::debug!(output = %self.name, buffered = self.buffered(), "draining output");
        self.flush_all().await;

        let hook = self
            .guard
            .isolate("after_close", async {
                self.variant.after_close().await;
                Ok(())
            })
            .await;
        if let Err(e) = hook {
            tracing::error!(output = %self.name, error = %e, "after-close hook failed");
        }
        self.guard.close(&self.variant).await;
        self.lifecycle.finish();

        let stats = self.stats();
        tracing::info!(
            output = %self.name,
            flushed = stats.flushed,
            dropped = stats.dropped,
            send_failures = stats.send_failures,
            "output closed"
        );
        Ok(())
    }

    /// Resolves once `run()` has reached Closed.
    pub async fn wait_closed(&self) {
        self.lifecycle.closed().await;
    }

    /// Drains full chunks only.
    async fn flush_ready(&self) {
        let size = self.settings.chunk_size;
        loop {
            let chunk = {
                let mut buffer = self.buffer.lock();
                if !buffer.should_flush(size) {
                    break;
                }
                buffer.drain_batch(size)
            };
            self.dispatch(chunk).await;
        }
    }

    /// Drains everything, one chunk at a time.
    async fn flush_all(&self) {
        let size = self.settings.chunk_size;
        loop {
            let chunk = self.buffer.lock().drain_batch(size);
            if chunk.is_empty() {
                break;
            }
            self.dispatch(chunk).await;
        }
    }

    async fn dispatch(&self, chunk: Chunk) {
        let kind = self.variant.kind();
        let started = Instant::now();
        metrics::gauge!(OUTPUT_BUFFER_SIZE, LABEL_OUTPUT => kind).decrement(chunk.len() as f64);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        let partition = match self.variant.destination() {
            Some(path) => path.partition(&chunk),
            None => Partition::single(self.variant.name(), &chunk),
        };

        for dropped in &partition.dropped {
            tracing::warn!(
                output = %self.name,
                index = dropped.index,
                error = %dropped.error,
                "message dropped: destination could not be resolved"
            );
        }
        self.count_dropped("destination", partition.dropped.len() as u64);

        for group in partition.groups {
            let (destination, messages) = group.into_parts();
            let messages = self.prepare(messages);
            if messages.is_empty() {
                continue;
            }
            self.send_group(&destination, &messages).await;
        }

        metrics::histogram!(OUTPUT_FLUSH_DURATION_SECONDS, LABEL_OUTPUT => kind)
            .record(started.elapsed().as_secs_f64());
    }

    /// Attaches configured attributes and compresses, keeping order.
    fn prepare(&self, messages: Vec<Message>) -> Vec<Message> {
        let attributes = &self.settings.attributes;
        let mut prepared = Vec::with_capacity(messages.len());

        for message in messages {
            let message = if attributes.is_empty() {
                message
            } else {
                message.with_default_attributes(attributes)
            };
            let Some(codec) = self.settings.compression else {
                prepared.push(message);
                continue;
            };
            match compress(message.payload(), codec) {
                Ok(bytes) => prepared.push(message.with_payload(bytes)),
                Err(e) => {
                    tracing::warn!(output = %self.name, %codec, error = %e, "compression failed, message dropped");
                    self.count_dropped("codec", 1);
                }
            }
        }
        prepared
    }

    /// Sends one group with up to `retry_attempts` immediate retries.
    async fn send_group(&self, destination: &str, messages: &[Message]) -> bool {
        let kind = self.variant.kind();
        let attempts = self.settings.retry_attempts.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let client = match self.guard.acquire(&self.variant).await {
                Ok(client) => client,
                Err(e) => {
                    tracing::debug!(output = %self.name, destination, attempt, error = %e, "no connection");
                    last_error = Some(e);
                    continue;
                }
            };

            let sent = self
                .guard
                .isolate("send", self.variant.send_batch(&client, messages, destination))
                .await;
            match sent {
                Ok(()) => {
                    let count = messages.len() as u64;
                    self.counters.flushed.fetch_add(count, Ordering::Relaxed);
                    metrics::counter!(OUTPUT_MESSAGES_FLUSHED_TOTAL, LABEL_OUTPUT => kind)
                        .increment(count);
                    tracing::debug!(output = %self.name, destination, messages = count, "batch sent");
                    return true;
                }
                Err(e) => {
                    if e.is_connection_error() {
                        self.guard.invalidate(&self.variant, &client, &e).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(OUTPUT_SEND_FAILURES_TOTAL, LABEL_OUTPUT => kind).increment(1);
        if let Some(e) = last_error {
            tracing::error!(
                output = %self.name,
                destination,
                messages = messages.len(),
                attempts,
                error = %e,
                "send failed, group abandoned for this flush"
            );
        }
        false
    }

    fn count_dropped(&self, reason: &'static str, count: u64) {
        if count == 0 {
            return;
        }
        self.counters.dropped.fetch_add(count, Ordering::Relaxed);
        metrics::counter!(
            OUTPUT_MESSAGES_DROPPED_TOTAL,
            LABEL_OUTPUT => self.variant.kind(),
            LABEL_REASON => reason
        )
        .increment(count);
    }
}

/// Lifecycle contract every output exposes to the manager.
pub trait Output: Send + Sync {
    fn kind(&self) -> &'static str;

    fn name(&self) -> String;

    fn state(&self) -> InstanceState;

    fn enqueue(&self, message: Message) -> bool;

    fn close(&self) -> bool;

    fn run(&self) -> impl Future<Output = Result<(), OutputError>> + Send;

    fn wait_closed(&self) -> impl Future<Output = ()> + Send;
}

/// Object-safe form of [`Output`], used for `Arc<dyn DynOutput>`.
pub trait DynOutput: Send + Sync {
    fn kind(&self) -> &'static str;

    fn name(&self) -> String;

    fn state(&self) -> InstanceState;

    fn enqueue(&self, message: Message) -> bool;

    fn close(&self) -> bool;

    fn run(&self) -> BoxFuture<'_, Result<(), OutputError>>;

    fn wait_closed(&self) -> BoxFuture<'_, ()>;
}

impl<T: Output> DynOutput for T {
    fn kind(&self) -> &'static str {
        Output::kind(self)
    }

    fn name(&self) -> String {
        Output::name(self)
    }

    fn state(&self) -> InstanceState {
        Output::state(self)
    }

    fn enqueue(&self, message: Message) -> bool {
        Output::enqueue(self, message)
    }

    fn close(&self) -> bool {
        Output::close(self)
    }

    fn run(&self) -> BoxFuture<'_, Result<(), OutputError>> {
        Box::pin(Output::run(self))
    }

    fn wait_closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(Output::wait_closed(self))
    }
}

impl<V: SinkVariant> Output for OutputHandler<V> {
    fn kind(&self) -> &'static str {
        self.variant.kind()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> InstanceState {
        OutputHandler::state(self)
    }

    fn enqueue(&self, message: Message) -> bool {
        OutputHandler::enqueue(self, message)
    }

    fn close(&self) -> bool {
        OutputHandler::close(self)
    }

    async fn run(&self) -> Result<(), OutputError> {
        OutputHandler::run(self).await
    }

    async fn wait_closed(&self) {
        OutputHandler::wait_closed(self).await;
    }
}
