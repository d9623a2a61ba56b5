//! The workspace actor task.
//!
//! Owns the machine id, the inactivity timer, and every in-flight lifecycle
//! operation for one workspace. The mailbox serializes operations, so a long
//! recovery blocks other callers of the same workspace but never another
//! workspace.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::provider::retry::retry;
use crate::provider::{MachineApi, MachineOp, ProviderError};
use crate::store::{LoadOutcome, MachineRecord, MachineStore};

use super::{ActorConfig, Command, WorkspaceError, WorkspaceHandle, WorkspaceKey};

const MAILBOX_SIZE: usize = 64;

struct Timer {
    generation: u64,
    task: tokio::task::JoinHandle<()>,
}

pub(crate) struct WorkspaceActor {
    key: WorkspaceKey,
    provider: Arc<dyn MachineApi>,
    store: Arc<MachineStore>,
    config: ActorConfig,
    machine_id: Option<String>,
    /// Set once the machine has been stopped by us; the next `EnsureMachine`
    /// restarts it instead of returning the id as-is.
    suspended: bool,
    timer: Option<Timer>,
    timer_seq: u64,
    /// Weak so the actor's own timer tasks never keep the mailbox open.
    inbox: mpsc::WeakSender<Command>,
}

/// Spawn the actor task for a key and return its handle.
pub(crate) fn spawn(
    key: WorkspaceKey,
    provider: Arc<dyn MachineApi>,
    store: Arc<MachineStore>,
    config: ActorConfig,
) -> WorkspaceHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
    let actor = WorkspaceActor {
        key,
        provider,
        store,
        config,
        machine_id: None,
        suspended: false,
        timer: None,
        timer_seq: 0,
        inbox: tx.downgrade(),
    };
    tokio::spawn(actor.run(rx));
    WorkspaceHandle::new(tx)
}

impl WorkspaceActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!(workspace = %self.key, "workspace actor started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        self.cancel_timer();
        debug!(workspace = %self.key, "workspace actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::GetMachineId { reply } => {
                let _ = reply.send(self.get_machine_id());
            }
            Command::EnsureMachine { reply } => {
                let _ = reply.send(self.ensure_machine().await);
            }
            Command::Suspend { reply } => {
                let _ = reply.send(self.suspend().await);
            }
            Command::MachineRequest { op, reply } => {
                let _ = reply.send(self.machine_request(op).await);
            }
            Command::InactivityFired { generation } => {
                self.on_inactivity_fired(generation).await;
            }
            #[cfg(test)]
            Command::Inspect { reply } => {
                let _ = reply.send(InspectState {
                    machine_id: self.machine_id.clone(),
                    suspended: self.suspended,
                    timer_generation: self.timer.as_ref().map(|t| t.generation),
                });
            }
        }
    }

    fn get_machine_id(&mut self) -> Result<String, WorkspaceError> {
        match self.machine_id.clone() {
            Some(id) => {
                if !self.suspended {
                    self.arm_timer();
                }
                Ok(id)
            }
            None => Err(WorkspaceError::NoMachine),
        }
    }

    /// Locate or provision a running machine: in-memory id first, then the
    /// persisted record, then the provider's machine list (recovery after
    /// losing local state), and finally a fresh create.
    async fn ensure_machine(&mut self) -> Result<String, WorkspaceError> {
        if let Some(id) = self.machine_id.clone() {
            if !self.suspended {
                self.arm_timer();
                return Ok(id);
            }
            match self.provider.start_machine(&id).await {
                Ok(()) => {
                    info!(workspace = %self.key, machine_id = %id, "machine reactivated");
                    self.suspended = false;
                    self.arm_timer();
                    return Ok(id);
                }
                Err(e) => {
                    warn!(
                        workspace = %self.key,
                        machine_id = %id,
                        error = %e,
                        "restart of suspended machine failed, reprovisioning"
                    );
                }
            }
        }

        match self.store.load(&self.key).await {
            Ok(LoadOutcome::Found(record)) => {
                match self.provider.start_machine(&record.machine_id).await {
                    Ok(()) => {
                        let id = record.machine_id;
                        info!(workspace = %self.key, machine_id = %id, "restored machine from record");
                        self.adopt(id.clone(), false).await;
                        return Ok(id);
                    }
                    Err(e) => {
                        warn!(
                            workspace = %self.key,
                            machine_id = %record.machine_id,
                            error = %e,
                            "recorded machine did not start, reprovisioning"
                        );
                    }
                }
            }
            Ok(LoadOutcome::Missing) | Ok(LoadOutcome::Corrupt) => {}
            Err(e) => {
                warn!(workspace = %self.key, error = %e, "machine record unreadable");
            }
        }

        match self.provider.list_machines().await {
            Ok(machines) => {
                let mut matches = machines
                    .into_iter()
                    .filter(|m| !m.id.is_empty() && m.serves(&self.key.user, &self.key.repo));
                if let (Some(machine), None) = (matches.next(), matches.next()) {
                    // The orphan may have been stopped by a previous process;
                    // the contract is to hand back a running machine.
                    let stopped =
                        matches!(machine.state.as_deref(), Some("stopped") | Some("suspended"));
                    let started = if stopped {
                        self.provider.start_machine(&machine.id).await
                    } else {
                        Ok(())
                    };
                    match started {
                        Ok(()) => {
                            info!(workspace = %self.key, machine_id = %machine.id, "adopted orphaned machine");
                            self.adopt(machine.id.clone(), true).await;
                            return Ok(machine.id);
                        }
                        Err(e) => {
                            warn!(
                                workspace = %self.key,
                                machine_id = %machine.id,
                                error = %e,
                                "orphaned machine did not start, creating a new one"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(workspace = %self.key, error = %e, "listing machines failed");
            }
        }

        let overrides = json!({
            "config": {
                "env": {
                    "USERNAME": self.key.user,
                    "REPO_NAME": self.key.repo,
                },
            },
        });
        match self.provider.create_machine(overrides).await {
            Ok(machine) => {
                info!(workspace = %self.key, machine_id = %machine.id, "machine created");
                self.adopt(machine.id.clone(), true).await;
                Ok(machine.id)
            }
            Err(e) => {
                warn!(workspace = %self.key, error = %e, "machine create failed");
                Err(e.into())
            }
        }
    }

    async fn suspend(&mut self) -> Result<String, WorkspaceError> {
        let Some(id) = self.machine_id.clone() else {
            return Err(WorkspaceError::NoMachine);
        };
        // The timer goes away regardless of how the stop call fares.
        self.cancel_timer();
        match self.provider.stop_machine(&id).await {
            Ok(()) => {
                info!(workspace = %self.key, machine_id = %id, "machine suspended");
                self.suspended = true;
                Ok(id)
            }
            Err(e) => {
                warn!(workspace = %self.key, machine_id = %id, error = %e, "suspend failed");
                Err(e.into())
            }
        }
    }

    async fn machine_request(&mut self, op: MachineOp) -> Result<Value, WorkspaceError> {
        let Some(id) = self.machine_id.clone() else {
            return Err(WorkspaceError::NoMachine);
        };
        match self.provider.machine_request(&id, &op).await {
            Ok(value) => {
                self.suspended = false;
                self.arm_timer();
                Ok(value)
            }
            Err(original) if original.is_recoverable() => {
                // The internal hostname stops resolving while a machine is
                // suspended or still booting: start it and retry the op.
                info!(
                    workspace = %self.key,
                    machine_id = %id,
                    error = %original,
                    "machine unreachable, restarting"
                );
                if let Err(start_err) = self.provider.start_machine(&id).await {
                    warn!(
                        workspace = %self.key,
                        machine_id = %id,
                        error = %start_err,
                        "restart failed"
                    );
                    return Err(original.into());
                }
                self.suspended = false;
                let provider = self.provider.clone();
                let retry_id = id.clone();
                let retry_op = op.clone();
                let result = retry(
                    &self.config.recovery_backoff,
                    ProviderError::is_recoverable,
                    move || {
                        let provider = provider.clone();
                        let id = retry_id.clone();
                        let op = retry_op.clone();
                        async move { provider.machine_request(&id, &op).await }
                    },
                )
                .await;
                match result {
                    Ok(value) => {
                        self.arm_timer();
                        Ok(value)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_inactivity_fired(&mut self, generation: u64) {
        // A firing from a timer that has since been cancelled or re-armed
        // (including by a concurrent manual suspend) is a no-op.
        if self.timer.as_ref().map(|t| t.generation) != Some(generation) {
            debug!(workspace = %self.key, generation, "stale inactivity firing ignored");
            return;
        }
        self.timer = None;
        if self.machine_id.is_none() || self.suspended {
            return;
        }
        info!(workspace = %self.key, "inactivity timeout reached");
        if let Err(e) = self.suspend().await {
            warn!(workspace = %self.key, error = %e, "auto-suspend failed");
        }
    }

    /// Record a machine id as ours, persist it when asked, and arm the timer.
    async fn adopt(&mut self, id: String, persist: bool) {
        self.machine_id = Some(id.clone());
        self.suspended = false;
        if persist {
            let record = MachineRecord { machine_id: id };
            if let Err(e) = self.store.save(&self.key, &record).await {
                // The provider is the ground truth; losing the record only
                // costs a list lookup after the next restart.
                warn!(workspace = %self.key, error = %e, "persisting machine record failed");
            }
        }
        self.arm_timer();
    }

    fn arm_timer(&mut self) {
        self.cancel_timer();
        self.timer_seq += 1;
        let generation = self.timer_seq;
        let delay = self.config.inactivity_timeout;
        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Command::InactivityFired { generation }).await;
            }
        });
        self.timer = Some(Timer { generation, task });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.task.abort();
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct InspectState {
    pub machine_id: Option<String>,
    pub suspended: bool,
    pub timer_generation: Option<u64>,
}
