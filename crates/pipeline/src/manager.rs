//! I/O manager: the set of running inputs and outputs.
//!
//! Instances get a UUID on registration. Lookups and snapshots take a read
//! lock; registration and removal take a write lock, so the administrative
//! façade can list and stop instances while the daemon adds new ones.

use std::sync::Arc;

use logferry_core::message::Message;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ManagerError;
use crate::handler::DynOutput;
use crate::source::DynInput;
use crate::state::InstanceState;

/// Reporting view of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub state: InstanceState,
}

type Entries<T> = RwLock<Vec<(Uuid, Arc<T>)>>;

#[derive(Default)]
pub struct IoManager {
    inputs: Entries<dyn DynInput>,
    outputs: Entries<dyn DynOutput>,
}

impl IoManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_output(&self, output: Arc<dyn DynOutput>) -> Uuid {
        let id = Uuid::new_v4();
        tracing::info!(%id, kind = output.kind(), name = %output.name(), "output registered");
        self.outputs.write().push((id, output));
        id
    }

    pub fn register_input(&self, input: Arc<dyn DynInput>) -> Uuid {
        let id = Uuid::new_v4();
        tracing::info!(%id, kind = input.kind(), name = %input.name(), "input registered");
        self.inputs.write().push((id, input));
        id
    }

    /// Looks an output up by its textual id. Malformed ids find nothing.
    pub fn find_output(&self, id: &str) -> Option<Arc<dyn DynOutput>> {
        find(&self.outputs, id)
    }

    pub fn find_input(&self, id: &str) -> Option<Arc<dyn DynInput>> {
        find(&self.inputs, id)
    }

    /// Snapshot for reporting.
    pub fn get_outputs(&self) -> Vec<InstanceInfo> {
        self.outputs
            .read()
            .iter()
            .map(|(id, o)| InstanceInfo {
                id: *id,
                kind: o.kind(),
                name: o.name(),
                state: o.state(),
            })
            .collect()
    }

    pub fn get_inputs(&self) -> Vec<InstanceInfo> {
        self.inputs
            .read()
            .iter()
            .map(|(id, i)| InstanceInfo {
                id: *id,
                kind: i.kind(),
                name: i.name(),
                state: i.state(),
            })
            .collect()
    }

    pub fn outputs(&self) -> Vec<(Uuid, Arc<dyn DynOutput>)> {
        self.outputs.read().clone()
    }

    pub fn inputs(&self) -> Vec<(Uuid, Arc<dyn DynInput>)> {
        self.inputs.read().clone()
    }

    /// Requests close of one output. Closing an already closing instance
    /// is not an error.
    pub fn close_output(&self, id: &str) -> Result<(), ManagerError> {
        let output = lookup(&self.outputs, "output", id)?;
        output.close();
        Ok(())
    }

    pub fn close_input(&self, id: &str) -> Result<(), ManagerError> {
        let input = lookup(&self.inputs, "input", id)?;
        input.close();
        Ok(())
    }

    /// Enqueues `message` on every output still accepting messages.
    /// Stopped outputs stay listed but are skipped. Returns how many
    /// accepted it.
    pub fn dispatch(&self, message: &Message) -> usize {
        self.outputs
            .read()
            .iter()
            .filter(|(_, o)| o.state().accepts_messages())
            .filter(|(_, o)| o.enqueue(message.clone()))
            .count()
    }

    /// Requests close of every output; returns how many were still open.
    pub fn close_all_outputs(&self) -> usize {
        self.outputs.read().iter().filter(|(_, o)| o.close()).count()
    }

    pub fn close_all_inputs(&self) -> usize {
        self.inputs.read().iter().filter(|(_, i)| i.close()).count()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.read().len()
    }
}

fn find<T: ?Sized>(entries: &Entries<T>, id: &str) -> Option<Arc<T>> {
    let id = Uuid::parse_str(id.trim()).ok()?;
    entries
        .read()
        .iter()
        .find(|(entry, _)| *entry == id)
        .map(|(_, instance)| Arc::clone(instance))
}

fn lookup<T: ?Sized>(
    entries: &Entries<T>,
    category: &'static str,
    id: &str,
) -> Result<Arc<T>, ManagerError> {
    if id.trim().is_empty() {
        return Err(ManagerError::BlankId { category });
    }
    find(entries, id).ok_or_else(|| ManagerError::NotFound {
        category,
        id: id.to_owned(),
    })
}

/// Dispatcher loop: moves messages from the source channel to every
/// output until `cancel` fires, then forwards whatever is still queued.
///
/// Returns the number of messages received.
pub async fn forward(
    manager: Arc<IoManager>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) -> u64 {
    let mut received = 0u64;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => {
                    received += 1;
                    if manager.dispatch(&message) == 0 {
                        tracing::debug!("no output accepted message");
                    }
                }
                None => {
                    tracing::debug!("all sources closed, dispatcher stopping");
                    return received;
                }
            },
        }
    }

    rx.close();
    while let Ok(message) = rx.try_recv() {
        received += 1;
        manager.dispatch(&message);
    }
    tracing::debug!(received, "dispatcher stopped");
    received
}
