//! Worker - one service's poll loop inside a bounded retry shell
//!
//! ## States
//!
//! ```text
//! RUNNING ──error──► FAILED_RETRYING ──pause──► RUNNING
//!    │                     │
//!    │ cancelled           │ budget exhausted
//!    ▼                     ▼
//! TERMINATED             FATAL
//! ```
//!
//! Each failure is published as soon as it is counted, so the status actor
//! reports FAILED_RETRYING for the whole retry pause.
//!
//! Every poll attempt runs in its own task, so a panic inside the loop is
//! reported to the shell like any other error instead of taking the worker
//! down. Cancellation always wins over a retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};

use crate::error::MonitorError;

use super::messages::{WorkerEvent, WorkerEventKind};
use super::poller::{Poller, ShutdownSignal, SleepOutcome, cancellable_sleep};

/// Retries granted after a quiet period
pub const MAX_RETRIES: u32 = 30;

/// Failures further apart than this reset the retry budget
pub const FAILURE_WINDOW: TimeDelta = TimeDelta::seconds(600);

/// Pause before restarting a failed poll loop
pub const RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Bounded retry budget with a time-window reset
///
/// A burst of failures drains the budget, sporadic failures spaced more than
/// the window apart never do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    max: u32,
    remaining: u32,
    window: TimeDelta,
    last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { remaining: u32 },
    Exhausted,
}

impl RetryBudget {
    pub fn new(max: u32, window: TimeDelta) -> Self {
        Self {
            max,
            remaining: max,
            window,
            last_failure: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    /// Account for a failure at `now`.
    ///
    /// The budget is refilled first if the previous failure is older than the
    /// window, then one attempt is consumed.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> RetryDecision {
        let quiet = match self.last_failure {
            Some(last) => now - last > self.window,
            None => true,
        };
        if quiet {
            self.remaining = self.max;
        }

        self.remaining = self.remaining.saturating_sub(1);
        self.last_failure = Some(now);

        if self.remaining > 0 {
            RetryDecision::Retry {
                remaining: self.remaining,
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(MAX_RETRIES, FAILURE_WINDOW)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub max_retries: u32,
    pub failure_window: TimeDelta,
    pub retry_pause: Duration,

    /// Skip the retry shell and give up on the first error
    pub debug: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            failure_window: FAILURE_WINDOW,
            retry_pause: RETRY_PAUSE,
            debug: false,
        }
    }
}

#[derive(Debug)]
pub enum WorkerOutcome {
    /// Stopped on request
    Terminated,

    /// Stopped on its own, the error says why
    Fatal(MonitorError),
}

/// What the controller learns when a worker exits
#[derive(Debug)]
pub struct WorkerExit {
    pub service: String,
    pub outcome: WorkerOutcome,
}

impl WorkerExit {
    pub fn is_fatal(&self) -> bool {
        matches!(self.outcome, WorkerOutcome::Fatal(_))
    }
}

pub struct Worker {
    poller: Arc<Poller>,
    shutdown: ShutdownSignal,
    options: WorkerOptions,
    events: Option<broadcast::Sender<WorkerEvent>>,
}

impl Worker {
    pub fn new(poller: Poller, shutdown: ShutdownSignal, options: WorkerOptions) -> Self {
        Self {
            poller: Arc::new(poller),
            shutdown,
            options,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Run until cancelled or out of retries.
    #[instrument(skip_all, fields(service = %self.poller.service()))]
    pub async fn run(mut self) -> WorkerExit {
        let service = self.poller.service().to_string();
        let mut budget = RetryBudget::new(self.options.max_retries, self.options.failure_window);

        self.publish(WorkerEventKind::Started);

        loop {
            let error = match self.attempt().await {
                None => return self.exit(service, WorkerOutcome::Terminated),
                Some(error) => error,
            };

            if self.shutdown.is_triggered() {
                info!("stopping after error during shutdown: {error}");
                return self.exit(service, WorkerOutcome::Terminated);
            }

            if self.options.debug {
                error!("error monitoring {service}: {error}");
                self.publish(WorkerEventKind::Failed {
                    error: error.to_string(),
                    remaining: 0,
                });
                return self.exit(service, WorkerOutcome::Fatal(error));
            }

            let decision = budget.record_failure(Utc::now());
            let remaining = match decision {
                RetryDecision::Retry { remaining } => remaining,
                RetryDecision::Exhausted => 0,
            };
            self.publish(WorkerEventKind::Failed {
                error: error.to_string(),
                remaining,
            });

            if decision == RetryDecision::Exhausted {
                error!("error monitoring {service}: {error}, no retries left");
                let fatal = MonitorError::RetriesExhausted {
                    service: service.clone(),
                    last_error: Box::new(error),
                };
                return self.exit(service, WorkerOutcome::Fatal(fatal));
            }

            warn!("error monitoring {service}: {error}, retrying ({remaining}) more times");

            let pause = cancellable_sleep(self.options.retry_pause, &mut self.shutdown).await;
            if pause == SleepOutcome::Cancelled {
                return self.exit(service, WorkerOutcome::Terminated);
            }

            info!("restarting poll loop");
            self.publish(WorkerEventKind::Restarted);
        }
    }

    /// One run of the poll loop from its first tick. `None` on clean cancellation.
    async fn attempt(&self) -> Option<MonitorError> {
        let poller = self.poller.clone();
        let shutdown = self.shutdown.clone();

        match tokio::spawn(async move { poller.run(shutdown).await }).await {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(join_error) => Some(MonitorError::WorkerCrashed(join_error.to_string())),
        }
    }

    fn exit(&self, service: String, outcome: WorkerOutcome) -> WorkerExit {
        match &outcome {
            WorkerOutcome::Terminated => {
                info!("worker for {service} exiting");
                self.publish(WorkerEventKind::Terminated);
            }
            WorkerOutcome::Fatal(error) => self.publish(WorkerEventKind::Fatal {
                error: error.to_string(),
            }),
        }

        WorkerExit { service, outcome }
    }

    fn publish(&self, kind: WorkerEventKind) {
        if let Some(events) = &self.events {
            let _ = events.send(WorkerEvent::new(self.poller.service(), kind));
        }
    }
}
