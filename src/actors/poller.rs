//! Poll loop - drives one service's collection
//!
//! ## Message Flow
//!
//! ```text
//! Tick → for each target: connect → fetch → map → submit → cancellable sleep → Tick
//!                              ↓ fail     ↓ fail          ↓ fail
//!                            (skip target, keep going)
//! ```
//!
//! Connection, fetch and submit failures only skip the target they happened
//! on. Anything else ends the loop with an error and is handled by the
//! worker's retry shell.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, trace, warn};

use crate::api::MetricSink;
use crate::collector;
use crate::config::{ServiceDescriptor, Target};
use crate::error::MonitorResult;
use crate::source::DataSource;
use crate::util::epoch_seconds;
use crate::MetricSample;

use super::messages::{WorkerEvent, WorkerEventKind};

/// Longest single wait between two cancellation checks
const SLEEP_STEP: Duration = Duration::from_secs(1);

/// Controller side of the process-wide cancellation flag
#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Raise the flag. Returns `false` if it was already raised.
    pub fn trigger(&self) -> bool {
        self.sender.send_if_modified(|interrupted| {
            if *interrupted {
                false
            } else {
                *interrupted = true;
                true
            }
        })
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the cancellation flag held by workers
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// True once cancellation was requested or the controller is gone.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolves once cancellation is requested.
    pub async fn triggered(&mut self) {
        // An error means the sender was dropped, which counts as cancellation
        let _ = self.receiver.wait_for(|interrupted| *interrupted).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
}

/// Sleep for `duration` in steps of at most one second.
///
/// Returns early, within one step, once `shutdown` is triggered.
pub async fn cancellable_sleep(duration: Duration, shutdown: &mut ShutdownSignal) -> SleepOutcome {
    let mut remaining = duration;

    while !remaining.is_zero() {
        if shutdown.is_triggered() {
            return SleepOutcome::Cancelled;
        }

        let step = remaining.min(SLEEP_STEP);
        tokio::select! {
            _ = tokio::time::sleep(step) => {}
            _ = shutdown.triggered() => return SleepOutcome::Cancelled,
        }
        remaining -= step;
    }

    if shutdown.is_triggered() {
        SleepOutcome::Cancelled
    } else {
        SleepOutcome::Elapsed
    }
}

/// Result of one pass over the target list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub skipped: usize,

    /// The pass stopped early because cancellation was requested
    pub interrupted: bool,
}

/// Polls every target of one service on a fixed cadence
///
/// The poller keeps no state between ticks, every tick is a fresh snapshot.
pub struct Poller {
    descriptor: Arc<ServiceDescriptor>,
    source: Arc<dyn DataSource>,
    sink: Arc<dyn MetricSink>,

    /// Remote group name samples are submitted under
    group: String,

    /// Log every submitted sample at info level
    verbose: bool,

    /// Propagate target failures instead of skipping the target
    strict: bool,

    events: Option<broadcast::Sender<WorkerEvent>>,
}

impl Poller {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        source: Arc<dyn DataSource>,
        sink: Arc<dyn MetricSink>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            source,
            sink,
            group: group.into(),
            verbose: false,
            strict: false,
            events: None,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_events(mut self, events: broadcast::Sender<WorkerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn service(&self) -> &str {
        &self.descriptor.name
    }

    /// Poll until cancelled.
    ///
    /// Returns `Ok(())` only after cancellation. An error means the loop gave
    /// up on the current tick and should be restarted by the caller.
    #[instrument(skip_all, fields(service = %self.descriptor.name))]
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> MonitorResult<()> {
        info!(
            "monitoring {} targets every {}s",
            self.descriptor.targets.len(),
            self.descriptor.frequency
        );

        loop {
            if shutdown.is_triggered() {
                return Ok(());
            }

            let report = self.tick(&shutdown).await?;
            if report.interrupted {
                return Ok(());
            }

            debug!(
                "tick finished, {} submitted, {} skipped",
                report.submitted, report.skipped
            );
            self.publish(WorkerEventKind::TickCompleted {
                submitted: report.submitted,
                skipped: report.skipped,
            });

            let cadence = Duration::from_secs(self.descriptor.frequency);
            if cancellable_sleep(cadence, &mut shutdown).await == SleepOutcome::Cancelled {
                return Ok(());
            }
        }
    }

    /// One pass over the target list, in configured order.
    pub async fn tick(&self, shutdown: &ShutdownSignal) -> MonitorResult<TickReport> {
        let mut report = TickReport::default();

        for target in &self.descriptor.targets {
            if shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            match self.poll_target(target).await {
                Ok(()) => report.submitted += 1,
                Err(e) if e.is_target_local() && !self.strict => {
                    warn!("{}: {e} [skipping]", target.name);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn poll_target(&self, target: &Target) -> MonitorResult<()> {
        let raw = {
            let connection = self.source.connect(target).await?;
            connection.fetch_stats().await?
        };

        let values = collector::map(&raw, self.descriptor.field_table())?;
        let sample = MetricSample::new(&self.group, &target.name, epoch_seconds(), values);

        if self.verbose {
            info!("{sample}");
        } else {
            trace!("{sample}");
        }

        self.sink.submit(&sample).await
    }

    fn publish(&self, kind: WorkerEventKind) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(WorkerEvent::new(&self.descriptor.name, kind));
        }
    }
}
