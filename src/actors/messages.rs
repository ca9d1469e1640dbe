//! Message types for actor communication
//!
//! Workers never talk to each other. They publish [`WorkerEvent`]s on a
//! broadcast channel, and the status actor folds them into a per-service
//! [`ServiceStatus`] that can be queried through [`StatusCommand`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Event published by a worker whenever its lifecycle advances
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    /// Service the worker is bound to
    pub service: String,

    pub timestamp: DateTime<Utc>,

    pub kind: WorkerEventKind,
}

impl WorkerEvent {
    pub fn new(service: impl Into<String>, kind: WorkerEventKind) -> Self {
        Self {
            service: service.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
    /// The worker's first poll attempt started
    Started,

    /// One full pass over the target list finished
    TickCompleted { submitted: usize, skipped: usize },

    /// A poll attempt failed and will be retried
    Failed { error: String, remaining: u32 },

    /// The poll loop was restarted after a failure
    Restarted,

    /// The worker stopped after a cancellation request
    Terminated,

    /// The worker gave up
    Fatal { error: String },
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    FailedRetrying,
    Terminated,
    Fatal,
}

impl WorkerState {
    pub fn is_final(&self) -> bool {
        matches!(self, WorkerState::Terminated | WorkerState::Fatal)
    }
}

/// Aggregated view of one service, as seen through its worker's events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub state: WorkerState,
    pub ticks: u64,
    pub samples_submitted: u64,
    pub targets_skipped: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_tick: Option<DateTime<Utc>>,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Running,
            ticks: 0,
            samples_submitted: 0,
            targets_skipped: 0,
            failures: 0,
            last_error: None,
            last_tick: None,
        }
    }
}

/// Status of every known service, keyed by service name
pub type StatusSnapshot = BTreeMap<String, ServiceStatus>;

/// Commands that can be sent to the StatusActor
#[derive(Debug)]
pub enum StatusCommand {
    /// Get the current status of all services
    GetSnapshot {
        respond_to: oneshot::Sender<StatusSnapshot>,
    },

    /// Process any pending events, then shut down
    Shutdown,
}
