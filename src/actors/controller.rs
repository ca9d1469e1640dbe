//! Controller - owns the workers from startup to joint exit
//!
//! ## Startup
//!
//! 1. Load the remote definitions (retried, fatal when it keeps failing)
//! 2. Provision each service, skipping the ones that fail
//! 3. Spawn one worker per provisioned service
//!
//! A shutdown signal during startup aborts it: workers spawned so far are
//! stopped and joined before the controller gives up.
//!
//! ## Shutdown
//!
//! On the first SIGINT/SIGTERM the shared cancellation flag is raised, every
//! worker finishes its current operation and exits, and the controller joins
//! all of them before stopping the status actor. Further signals are ignored.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::api::{MetricSink, MetricsApi};
use crate::config::ServiceDescriptor;
use crate::error::{MonitorError, MonitorResult};
use crate::provision::{Provisioner, SetupOptions};
use crate::source::{DataSource, MongoSource};

use super::messages::{StatusSnapshot, WorkerEvent};
use super::poller::{Poller, Shutdown};
use super::status::StatusHandle;
use super::worker::{Worker, WorkerExit, WorkerOptions, WorkerOutcome};

/// Capacity of the worker event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Picks the data source a service's worker polls
pub type SourceFactory = Arc<dyn Fn(&ServiceDescriptor) -> Arc<dyn DataSource> + Send + Sync>;

/// External collaborators shared by the controller and its workers
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn MetricsApi>,
    pub sink: Arc<dyn MetricSink>,
    pub sources: SourceFactory,
}

impl Collaborators {
    /// MongoDB sources, remote API for both provisioning and delivery
    pub fn mongo<A>(api: Arc<A>) -> Self
    where
        A: MetricsApi + MetricSink + 'static,
    {
        Self {
            api: api.clone(),
            sink: api,
            sources: Arc::new(|service: &ServiceDescriptor| {
                Arc::new(MongoSource::for_service(service.kind)) as Arc<dyn DataSource>
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerOptions {
    pub worker: WorkerOptions,
    pub setup: SetupOptions,

    /// Log every submitted sample
    pub verbose: bool,

    /// Stop at the first error anywhere
    pub debug: bool,
}

pub struct Controller {
    shutdown: Shutdown,
    workers: JoinSet<WorkerExit>,
    services: Vec<String>,
    status: StatusHandle,
}

impl Controller {
    /// Provision every service and spawn its worker.
    ///
    /// Only a failure to reach the remote API at all is fatal; a service that
    /// cannot be provisioned is logged and left out.
    pub async fn start(
        services: Vec<ServiceDescriptor>,
        collaborators: Collaborators,
        options: ControllerOptions,
    ) -> MonitorResult<Self> {
        let (_sender, mut signals) = SignalListener::manual();
        Self::start_interruptible(services, collaborators, options, &mut signals).await
    }

    /// Like [`Controller::start`], but gives up as soon as `signals` fires.
    ///
    /// Workers spawned before the signal are stopped and joined, then
    /// [`MonitorError::Interrupted`] is returned.
    pub async fn start_interruptible(
        services: Vec<ServiceDescriptor>,
        collaborators: Collaborators,
        options: ControllerOptions,
        signals: &mut SignalListener,
    ) -> MonitorResult<Self> {
        let setup = SetupOptions {
            debug: options.debug || options.setup.debug,
            ..options.setup
        };
        let worker_options = WorkerOptions {
            debug: options.debug || options.worker.debug,
            ..options.worker
        };

        let shutdown = Shutdown::new();
        let (event_tx, event_rx) = broadcast::channel::<WorkerEvent>(EVENT_CHANNEL_CAPACITY);
        let status = StatusHandle::spawn(event_rx);

        let mut workers = JoinSet::new();
        let mut started = Vec::new();

        let launch = async {
            let mut provisioner = Provisioner::connect(collaborators.api.clone(), setup).await?;

            for service in services {
                if service.targets.is_empty() {
                    warn!("service {} has no targets, not starting a worker", service.name);
                    continue;
                }

                info!("checking remote definitions for {}", service.name);
                let group = match provisioner.provision(&service).await {
                    Ok(group) => group,
                    Err(e) if worker_options.debug => return Err(e),
                    Err(e) => {
                        error!("{e}");
                        continue;
                    }
                };

                let source = (collaborators.sources)(&service);
                let name = service.name.clone();
                let poller = Poller::new(
                    Arc::new(service),
                    source,
                    collaborators.sink.clone(),
                    group.name,
                )
                .with_verbose(options.verbose)
                .with_strict(worker_options.debug)
                .with_events(event_tx.clone());

                let worker = Worker::new(poller, shutdown.signal(), worker_options)
                    .with_events(event_tx.clone());

                workers.spawn(worker.run());
                info!("started worker for {name}");
                started.push(name);
            }

            Ok::<(), MonitorError>(())
        };

        let outcome = tokio::select! {
            result = launch => result,
            name = signals.recv() => {
                info!("received {name} during startup");
                Err(MonitorError::Interrupted(name.to_string()))
            }
        };

        if let Err(e) = outcome {
            shutdown.trigger();
            while let Some(result) = workers.join_next().await {
                record_exit(result);
            }
            if let Err(join_error) = status.shutdown().await {
                warn!("status actor did not shut down cleanly: {join_error:#}");
            }
            return Err(e);
        }

        Ok(Self {
            shutdown,
            workers,
            services: started,
            status,
        })
    }

    /// Services that got a worker
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Workers that have not been joined yet
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn status(&self) -> anyhow::Result<StatusSnapshot> {
        self.status.snapshot().await
    }

    /// Request termination of every worker.
    ///
    /// Only the first call has an effect, it returns `false` afterwards.
    pub fn interrupt(&self) -> bool {
        let first = self.shutdown.trigger();
        if first {
            info!("INTERRUPTED, waiting for {} workers to exit", self.workers.len());
        } else {
            debug!("already interrupted");
        }
        first
    }

    pub fn is_interrupted(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Run until a shutdown signal arrives or every worker has exited,
    /// then join everything.
    pub async fn run(mut self, mut signals: SignalListener) -> Vec<WorkerExit> {
        let mut exits = Vec::new();

        loop {
            tokio::select! {
                name = signals.recv() => {
                    info!("received {name}");
                    break;
                }
                joined = self.workers.join_next() => match joined {
                    Some(result) => exits.push(record_exit(result)),
                    None => {
                        warn!("all workers have exited");
                        break;
                    }
                }
            }
        }

        self.interrupt();

        loop {
            tokio::select! {
                joined = self.workers.join_next() => match joined {
                    Some(result) => exits.push(record_exit(result)),
                    None => break,
                },
                name = signals.recv() => {
                    debug!("ignoring {name}, already shutting down");
                }
            }
        }

        self.finish(exits).await
    }

    /// Interrupt every worker and wait for all of them to exit.
    pub async fn join(mut self) -> Vec<WorkerExit> {
        self.interrupt();

        let mut exits = Vec::new();
        while let Some(result) = self.workers.join_next().await {
            exits.push(record_exit(result));
        }

        self.finish(exits).await
    }

    async fn finish(self, exits: Vec<WorkerExit>) -> Vec<WorkerExit> {
        debug!("waiting for status actor to exit");
        if let Err(e) = self.status.shutdown().await {
            warn!("status actor did not shut down cleanly: {e:#}");
        }

        info!("exiting cleanly");
        exits
    }
}

fn record_exit(result: Result<WorkerExit, JoinError>) -> WorkerExit {
    match result {
        Ok(exit) => {
            match &exit.outcome {
                WorkerOutcome::Terminated => debug!("worker for {} joined", exit.service),
                WorkerOutcome::Fatal(e) => error!("worker for {} died: {e}", exit.service),
            }
            exit
        }
        Err(e) => {
            error!("worker task failed: {e}");
            WorkerExit {
                service: "<unknown>".to_string(),
                outcome: WorkerOutcome::Fatal(MonitorError::WorkerCrashed(e.to_string())),
            }
        }
    }
}

/// Listens for SIGINT and SIGTERM
///
/// Created before any worker starts so a signal is never missed.
pub struct SignalListener {
    source: SignalSource,
}

enum SignalSource {
    #[cfg(unix)]
    Unix {
        interrupt: tokio::signal::unix::Signal,
        terminate: tokio::signal::unix::Signal,
    },
    #[cfg(not(unix))]
    CtrlC,
    Manual(mpsc::UnboundedReceiver<&'static str>),
}

impl SignalListener {
    pub fn register() -> MonitorResult<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            Ok(Self {
                source: SignalSource::Unix {
                    interrupt: signal(SignalKind::interrupt())?,
                    terminate: signal(SignalKind::terminate())?,
                },
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {
                source: SignalSource::CtrlC,
            })
        }
    }

    /// Listener fed by hand: every name sent on the returned sender is
    /// delivered as a signal.
    pub fn manual() -> (mpsc::UnboundedSender<&'static str>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            Self {
                source: SignalSource::Manual(receiver),
            },
        )
    }

    /// Wait for the next signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        match &mut self.source {
            #[cfg(unix)]
            SignalSource::Unix {
                interrupt,
                terminate,
            } => {
                tokio::select! {
                    _ = interrupt.recv() => "SIGINT",
                    _ = terminate.recv() => "SIGTERM",
                }
            }

            #[cfg(not(unix))]
            SignalSource::CtrlC => match tokio::signal::ctrl_c().await {
                Ok(()) => "ctrl-c",
                Err(e) => {
                    error!("cannot listen for ctrl-c: {e}");
                    std::future::pending().await
                }
            },

            SignalSource::Manual(receiver) => match receiver.recv().await {
                Some(name) => name,
                // Nobody can send anymore, so no signal will ever arrive
                None => std::future::pending().await,
            },
        }
    }
}
