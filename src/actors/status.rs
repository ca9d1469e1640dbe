//! StatusActor - aggregates worker events
//!
//! Subscribes to the workers' event channel and keeps one [`ServiceStatus`]
//! per service. The controller queries it for snapshots, logs a summary from
//! it at shutdown and joins it after the last worker has exited.

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::messages::{
    ServiceStatus, StatusCommand, StatusSnapshot, WorkerEvent, WorkerEventKind, WorkerState,
};

pub struct StatusActor {
    command_rx: mpsc::Receiver<StatusCommand>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    services: StatusSnapshot,
}

impl StatusActor {
    pub fn new(
        command_rx: mpsc::Receiver<StatusCommand>,
        event_rx: broadcast::Receiver<WorkerEvent>,
    ) -> Self {
        Self {
            command_rx,
            event_rx,
            services: StatusSnapshot::new(),
        }
    }

    /// Run until shut down, returning the final snapshot
    #[instrument(skip_all)]
    pub async fn run(mut self) -> StatusSnapshot {
        debug!("starting status actor");
        let mut events_open = true;

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        StatusCommand::GetSnapshot { respond_to } => {
                            self.drain_pending();
                            let _ = respond_to.send(self.services.clone());
                        }
                        StatusCommand::Shutdown => {
                            debug!("received shutdown command");
                            self.drain_pending();
                            break;
                        }
                    }
                }

                event = self.event_rx.recv(), if events_open => {
                    match event {
                        Ok(event) => self.apply(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("status actor lagged, {skipped} worker events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("worker event channel closed");
                            events_open = false;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        for (service, status) in &self.services {
            info!(
                "{service}: {:?} after {} ticks, {} samples submitted, {} failures",
                status.state, status.ticks, status.samples_submitted, status.failures
            );
        }

        self.services
    }

    fn drain_pending(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("status actor lagged, {skipped} worker events dropped");
                }
                Err(_) => break,
            }
        }
    }

    fn apply(&mut self, event: WorkerEvent) {
        let status = self.services.entry(event.service).or_default();

        match event.kind {
            WorkerEventKind::Started | WorkerEventKind::Restarted => {
                status.state = WorkerState::Running;
            }
            WorkerEventKind::TickCompleted { submitted, skipped } => {
                status.state = WorkerState::Running;
                status.ticks += 1;
                status.samples_submitted += submitted as u64;
                status.targets_skipped += skipped as u64;
                status.last_tick = Some(event.timestamp);
            }
            WorkerEventKind::Failed { error, .. } => {
                status.state = WorkerState::FailedRetrying;
                status.failures += 1;
                status.last_error = Some(error);
            }
            WorkerEventKind::Terminated => {
                status.state = WorkerState::Terminated;
            }
            WorkerEventKind::Fatal { error } => {
                // the failure itself was counted by the preceding Failed event
                status.state = WorkerState::Fatal;
                status.last_error = Some(error);
            }
        }
    }
}

/// Handle for controlling the StatusActor
pub struct StatusHandle {
    sender: mpsc::Sender<StatusCommand>,
    task: JoinHandle<StatusSnapshot>,
}

impl StatusHandle {
    pub fn spawn(event_rx: broadcast::Receiver<WorkerEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = StatusActor::new(cmd_rx, event_rx);

        Self {
            sender: cmd_tx,
            task: tokio::spawn(actor.run()),
        }
    }

    pub async fn snapshot(&self) -> anyhow::Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StatusCommand::GetSnapshot { respond_to: tx })
            .await
            .context("failed to send GetSnapshot command")?;
        rx.await.context("failed to receive snapshot")
    }

    /// Stop the actor and wait for it, returning the final snapshot
    pub async fn shutdown(self) -> anyhow::Result<StatusSnapshot> {
        // The actor may already be gone, the join below reports that
        let _ = self.sender.send(StatusCommand::Shutdown).await;
        self.task.await.context("status actor panicked")
    }
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        !self.state.is_final()
    }
}
