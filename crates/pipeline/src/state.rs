//! Instance lifecycle shared by outputs and inputs.
//!
//! ```text
//! Idle → Running → Draining → Closed
//!   └──── close() ───┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one input or output instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Constructed, `run()` not called yet
    Idle,
    Running,
    /// Close requested, finishing the last flush
    Draining,
    /// Completion signalled
    Closed,
}

impl InstanceState {
    /// Idle and Running instances still take messages.
    pub fn accepts_messages(self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// State machine plus the shutdown and completion signals.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<InstanceState>,
    started: AtomicBool,
    shutdown: CancellationToken,
    completed: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InstanceState::Idle),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            completed: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    /// Marks the run loop as started. Returns `false` if it already was.
    ///
    /// An instance closed before it ever ran stays in Draining so the run
    /// loop goes straight to its final flush.
    pub fn begin_run(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock();
        if *state == InstanceState::Idle {
            *state = InstanceState::Running;
        }
        true
    }

    /// Requests shutdown. Only the first call returns `true`.
    pub fn request_close(&self) -> bool {
        let mut state = self.state.lock();
        if !state.accepts_messages() {
            return false;
        }
        *state = InstanceState::Draining;
        self.shutdown.cancel();
        true
    }

    /// Runs `f` while holding the state lock, so the decision it makes
    /// cannot race with [`request_close`](Self::request_close).
    pub fn with_state<T>(&self, f: impl FnOnce(InstanceState) -> T) -> T {
        let state = self.state.lock();
        f(*state)
    }

    /// Fires the completion signal.
    pub fn finish(&self) {
        *self.state.lock() = InstanceState::Closed;
        self.completed.cancel();
    }

    /// Resolves once close has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Child token cancelled on close, for spawned connection tasks.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Resolves once [`finish`](Self::finish) has run.
    pub async fn closed(&self) {
        self.completed.cancelled().await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
