//! Per-workspace lifecycle actors.
//!
//! Each `(session, user, repo)` triple owns one long-lived actor that
//! serializes every lifecycle operation for that workspace: provisioning,
//! suspension, recovery, and the inactivity timer. Callers talk to actors
//! through [`WorkspaceHandle`], which enqueues a typed command and waits on a
//! one-shot reply with an external deadline.

pub mod actor;
pub mod registry;

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::provider::retry::Backoff;
use crate::provider::{MachineOp, ProviderError};

pub use registry::WorkspaceRegistry;

/// Deadline an outside caller waits for an actor reply.
const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Identity of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey {
    pub session_id: String,
    pub user: String,
    pub repo: String,
}

impl std::fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.session_id, self.user, self.repo)
    }
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The workspace has no machine yet; provisioning has not been attempted
    /// or has failed.
    #[error("no machine provisioned")]
    NoMachine,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("workspace actor stopped")]
    ActorGone,

    #[error("workspace call deadline exceeded")]
    DeadlineExceeded,
}

type Reply<T> = oneshot::Sender<Result<T, WorkspaceError>>;

/// Commands consumed by a workspace actor, one at a time.
pub(crate) enum Command {
    GetMachineId {
        reply: Reply<String>,
    },
    EnsureMachine {
        reply: Reply<String>,
    },
    Suspend {
        reply: Reply<String>,
    },
    MachineRequest {
        op: MachineOp,
        reply: Reply<Value>,
    },
    /// Sent by the actor's own timer task. The generation lets the actor
    /// discard firings from timers that were re-armed or cancelled since.
    InactivityFired {
        generation: u64,
    },
    #[cfg(test)]
    Inspect {
        reply: oneshot::Sender<actor::InspectState>,
    },
}

/// Tuning shared by all actors.
#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub inactivity_timeout: Duration,
    /// Backoff used when retrying a machine operation after a restart.
    pub recovery_backoff: Backoff,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30 * 60),
            recovery_backoff: Backoff::default(),
        }
    }
}

/// Cheap cloneable reference to one workspace actor.
#[derive(Clone)]
pub struct WorkspaceHandle {
    tx: mpsc::Sender<Command>,
}

impl WorkspaceHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Current machine id, or `NoMachine` before provisioning.
    pub async fn machine_id(&self) -> Result<String, WorkspaceError> {
        self.call(|reply| Command::GetMachineId { reply }).await
    }

    /// Return the id of a running machine, provisioning or reactivating one
    /// if needed. Concurrent callers on the same workspace all observe the
    /// same id.
    pub async fn ensure_machine(&self) -> Result<String, WorkspaceError> {
        self.call(|reply| Command::EnsureMachine { reply }).await
    }

    /// Stop the machine, keeping its id for later restart. Returns the id
    /// that was stopped.
    #[allow(dead_code)] // operational surface, exercised in tests
    pub async fn suspend(&self) -> Result<String, WorkspaceError> {
        self.call(|reply| Command::Suspend { reply }).await
    }

    /// Run one operation against the machine, restarting it first when it
    /// looks suspended.
    #[allow(dead_code)] // operational surface, exercised in tests
    pub async fn machine_request(&self, op: MachineOp) -> Result<Value, WorkspaceError> {
        self.call(|reply| Command::MachineRequest { op, reply }).await
    }

    /// List the agent sessions running inside the workspace machine.
    #[allow(dead_code)] // operational surface, exercised in tests
    pub async fn list_sessions(&self) -> Result<Value, WorkspaceError> {
        self.machine_request(MachineOp::list_sessions()).await
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, WorkspaceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| WorkspaceError::ActorGone)?;
        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Err(_) => Err(WorkspaceError::DeadlineExceeded),
            Ok(Err(_)) => Err(WorkspaceError::ActorGone),
            Ok(Ok(result)) => result,
        }
    }

    #[cfg(test)]
    pub(crate) async fn inspect(&self) -> actor::InspectState {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Inspect { reply })
            .await
            .expect("actor gone");
        rx.await.expect("actor gone")
    }

    /// Inject a timer firing, as the timer task would.
    #[cfg(test)]
    pub(crate) async fn fire_inactivity(&self, generation: u64) {
        self.tx
            .send(Command::InactivityFired { generation })
            .await
            .expect("actor gone");
    }
}
