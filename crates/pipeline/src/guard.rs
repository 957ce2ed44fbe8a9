//! Connection guard: lazy, validated, fault-isolated backend handles.
//!
//! # Lifecycle
//! ```text
//! absent → acquire() → connect → probe ─ok→ present ──send error──→ invalidate → absent
//!                                   └─fail→ release → absent (retried on next acquire)
//! present/absent → close() → closed (exactly once)
//! ```
//!
//! Every call into backend code (connect, probe, send, close) goes through
//! [`ConnectionGuard::isolate`], the single place where a panic is caught
//! and turned into [`OutputError::Fault`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use logferry_core::metrics::{
    CONNECTION_CONNECTS_TOTAL, CONNECTION_FAULTS_TOTAL, CONNECTION_INVALIDATIONS_TOTAL,
    CONNECTION_PROBE_FAILURES_TOTAL, LABEL_OUTPUT,
};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::OutputError;

/// A backend client, either exclusively owned or borrowed from a
/// [`SharedPool`](crate::pool::SharedPool).
pub enum Handle<C> {
    /// Closed by the guard on invalidation and on close
    Owned(Arc<C>),
    /// Never closed by the borrower
    Pooled(Arc<C>),
}

impl<C> Handle<C> {
    pub fn owned(client: C) -> Self {
        Self::Owned(Arc::new(client))
    }

    pub fn pooled(client: Arc<C>) -> Self {
        Self::Pooled(client)
    }

    pub fn client(&self) -> &Arc<C> {
        match self {
            Self::Owned(c) | Self::Pooled(c) => c,
        }
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }
}

impl<C> Clone for Handle<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Owned(c) => Self::Owned(Arc::clone(c)),
            Self::Pooled(c) => Self::Pooled(Arc::clone(c)),
        }
    }
}

/// How a backend creates, validates and closes its client.
pub trait Connector: Send + Sync {
    type Client: Send + Sync + 'static;

    /// Creates a client. May perform network I/O; called again after
    /// every invalidation.
    fn connect(&self) -> impl Future<Output = Result<Handle<Self::Client>, OutputError>> + Send;

    /// Cheap health check issued right after connecting.
    fn probe(
        &self,
        _client: &Self::Client,
    ) -> impl Future<Output = Result<(), OutputError>> + Send {
        async { Ok(()) }
    }

    /// Releases an owned client.
    fn close_client(
        &self,
        _client: &Self::Client,
    ) -> impl Future<Output = Result<(), OutputError>> + Send {
        async { Ok(()) }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GuardStats {
    pub connects: u64,
    pub probe_failures: u64,
    pub faults: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    probe_failures: AtomicU64,
    faults: AtomicU64,
    invalidations: AtomicU64,
}

/// Holds at most one live handle for one output instance.
pub struct ConnectionGuard<C> {
    kind: &'static str,
    label: String,
    slot: RwLock<Option<Handle<C>>>,
    connect_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    counters: Counters,
}

impl<C: Send + Sync + 'static> ConnectionGuard<C> {
    /// `kind` labels metrics; `label` identifies the instance in logs.
    pub fn new(kind: &'static str, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            slot: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Returns the live client, connecting and probing first if needed.
    ///
    /// Concurrent callers are serialized on the connect lock and re-check
    /// the slot, so one instance connects at most once at a time.
    pub async fn acquire<K>(&self, connector: &K) -> Result<Arc<C>, OutputError>
    where
        K: Connector<Client = C>,
    {
        if let Some(client) = self.current() {
            return Ok(client);
        }

        let _connecting = self.connect_lock.lock().await;
        if self.is_closed() {
            return Err(OutputError::Closed(self.label.clone()));
        }
        if let Some(client) = self.current() {
            return Ok(client);
        }

        let handle = self.isolate("connect", connector.connect()).await?;
        self.counters.connects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CONNECTION_CONNECTS_TOTAL, LABEL_OUTPUT => self.kind).increment(1);

        if let Err(e) = self.isolate("probe", connector.probe(handle.client())).await {
            self.counters.probe_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(CONNECTION_PROBE_FAILURES_TOTAL, LABEL_OUTPUT => self.kind)
                .increment(1);
            tracing::warn!(output = %self.label, error = %e, "health probe failed, discarding connection");
            self.release(connector, handle).await;
            return Err(e);
        }

        tracing::info!(
            output = %self.label,
            pooled = handle.is_pooled(),
            "connection established"
        );
        let client = Arc::clone(handle.client());
        *self.slot.write() = Some(handle);
        Ok(client)
    }

    /// Discards the handle that produced `failed`. A newer handle installed
    /// in the meantime is left alone.
    pub async fn invalidate<K>(&self, connector: &K, failed: &Arc<C>, reason: &OutputError)
    where
        K: Connector<Client = C>,
    {
        let taken = {
            let mut slot = self.slot.write();
            match slot.as_ref() {
                Some(handle) if Arc::ptr_eq(handle.client(), failed) => slot.take(),
                _ => None,
            }
        };

        if let Some(handle) = taken {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(CONNECTION_INVALIDATIONS_TOTAL, LABEL_OUTPUT => self.kind)
                .increment(1);
            tracing::warn!(output = %self.label, error = %reason, "connection invalidated");
            self.release(connector, handle).await;
        }
    }

    /// Tears the handle down. Only the first call does anything; it
    /// returns `true`.
    pub async fn close<K>(&self, connector: &K) -> bool
    where
        K: Connector<Client = C>,
    {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // wait out an in-flight connect so its handle is not leaked
        let _connecting = self.connect_lock.lock().await;
        let taken = self.slot.write().take();
        if let Some(handle) = taken {
            self.release(connector, handle).await;
            tracing::debug!(output = %self.label, "connection closed");
        }
        true
    }

    /// Runs one backend operation, converting a panic into
    /// [`OutputError::Fault`].
    pub async fn isolate<T, F>(&self, operation: &'static str, fut: F) -> Result<T, OutputError>
    where
        F: Future<Output = Result<T, OutputError>>,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.counters.faults.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(CONNECTION_FAULTS_TOTAL, LABEL_OUTPUT => self.kind).increment(1);
                tracing::error!(
                    output = %self.label,
                    operation,
                    panic = %message,
                    "caught fault in connection operation"
                );
                Err(OutputError::Fault { operation, message })
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            connects: self.counters.connects.load(Ordering::Relaxed),
            probe_failures: self.counters.probe_failures.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    fn current(&self) -> Option<Arc<C>> {
        self.slot.read().as_ref().map(|h| Arc::clone(h.client()))
    }

    async fn release<K>(&self, connector: &K, handle: Handle<C>)
    where
        K: Connector<Client = C>,
    {
        let Handle::Owned(client) = handle else {
            return;
        };
        if let Err(e) = self.isolate("close", connector.close_client(&client)).await {
            tracing::warn!(output = %self.label, error = %e, "failed to close connection");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
