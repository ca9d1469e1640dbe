//! Helper functions and in-memory collaborators for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mongowatch::{
    MetricSample,
    actors::{
        controller::{Collaborators, SourceFactory},
        poller::Shutdown,
    },
    api::{Dashboard, MetricGroup, MetricSink, MetricsApi},
    config::{ServiceDescriptor, ServiceKind, Target},
    error::{MonitorError, MonitorResult},
    source::{DataSource, RawStats, SourceConnection},
};
use serde_json::{Value, json};

pub fn create_test_target(name: &str) -> Target {
    Target {
        name: name.to_string(),
        hostname: "127.0.0.1".to_string(),
        port: 27017,
        database: "admin".to_string(),
        username: None,
        password: None,
    }
}

pub fn create_test_service(name: &str, targets: &[&str], frequency: u64) -> ServiceDescriptor {
    ServiceDescriptor {
        name: name.to_string(),
        kind: ServiceKind::MongoDbAdmin,
        group_name: name.to_string(),
        group_label: format!("Label {name}"),
        dashboard: format!("Dashboard {name}"),
        frequency,
        targets: targets.iter().map(|t| create_test_target(t)).collect(),
    }
}

pub fn server_status(inserts: i64) -> Value {
    json!({
        "opcounters": {"insert": inserts, "query": 10, "update": 5, "delete": 1, "getmore": 0, "command": 20},
        "connections": {"current": 3, "available": 816},
        "uptime": 120
    })
}

/// Stats that violate the server status schema
pub fn malformed_status() -> Value {
    json!({"opcounters": {"insert": "many"}})
}

/// What a fake target does on one connection attempt
#[derive(Clone)]
pub enum Step {
    Stats(Value),
    ConnectError,
    FetchError,
    Panic,
    /// Take this long to connect, then return the stats
    Slow(Duration, Value),
}

/// Scripted data source
///
/// Every target plays its script in order, the last step repeats forever.
pub struct FakeSource {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default: Step,
    connects: Mutex<Vec<String>>,
    cancel_on: Mutex<Option<(String, Arc<Shutdown>)>>,
}

impl FakeSource {
    pub fn new(default: Step) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            connects: Mutex::new(Vec::new()),
            cancel_on: Mutex::new(None),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Step::Stats(server_status(42)))
    }

    pub fn script(self, target: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), steps.into());
        self
    }

    /// Trigger `shutdown` when `target` is connected to
    pub fn cancel_on(self, target: &str, shutdown: Arc<Shutdown>) -> Self {
        *self.cancel_on.lock().unwrap() = Some((target.to_string(), shutdown));
        self
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    fn next_step(&self, target: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(target) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or_else(|| self.default.clone()),
            None => self.default.clone(),
        }
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn connect(&self, target: &Target) -> MonitorResult<Box<dyn SourceConnection>> {
        self.connects.lock().unwrap().push(target.name.clone());

        if let Some((name, shutdown)) = self.cancel_on.lock().unwrap().as_ref() {
            if *name == target.name {
                shutdown.trigger();
            }
        }

        let step = self.next_step(&target.name);
        match step {
            Step::Stats(stats) => Ok(Box::new(FakeConnection(Ok(stats)))),
            Step::FetchError => Ok(Box::new(FakeConnection(Err("command failed".into())))),
            Step::ConnectError => Err(MonitorError::Connection(format!(
                "{} refused the connection",
                target.name
            ))),
            Step::Panic => panic!("driver blew up on {}", target.name),
            Step::Slow(delay, stats) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(FakeConnection(Ok(stats))))
            }
        }
    }
}

struct FakeConnection(Result<Value, String>);

#[async_trait]
impl SourceConnection for FakeConnection {
    async fn fetch_stats(&self) -> MonitorResult<RawStats> {
        self.0.clone().map_err(MonitorError::Fetch)
    }
}

/// Sink that keeps every sample it accepts
#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<MetricSample>>,
    failing: HashSet<String>,
}

impl RecordingSink {
    pub fn failing_for(identifiers: &[&str]) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            failing: identifiers.iter().map(|i| i.to_string()).collect(),
        }
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.samples()
            .iter()
            .map(|sample| sample.identifier().to_string())
            .collect()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn submit(&self, sample: &MetricSample) -> MonitorResult<()> {
        if self.failing.contains(sample.identifier()) {
            return Err(MonitorError::Submit("HTTP 500".to_string()));
        }
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ApiCounters {
    pub groups_created: usize,
    pub groups_updated: usize,
    pub dashboards_created: usize,
}

/// Remote API kept in memory
#[derive(Default)]
pub struct MemoryApi {
    groups: Mutex<Vec<MetricGroup>>,
    dashboards: Mutex<Vec<Dashboard>>,
    counters: Mutex<ApiCounters>,
    failing_groups: HashSet<String>,
    hanging_groups: HashSet<String>,
    hanging_listing: bool,
    listing_failures: AtomicU32,
    listing_calls: AtomicU32,
}

impl MemoryApi {
    pub fn failing_groups(groups: &[&str]) -> Self {
        Self {
            failing_groups: groups.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fail the first `count` listing calls
    pub fn with_listing_failures(self, count: u32) -> Self {
        self.listing_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Listing calls never answer
    pub fn with_hanging_listing(mut self) -> Self {
        self.hanging_listing = true;
        self
    }

    /// Creating `group` never answers
    pub fn with_hanging_group(mut self, group: &str) -> Self {
        self.hanging_groups.insert(group.to_string());
        self
    }

    pub fn with_group(self, group: MetricGroup) -> Self {
        self.groups.lock().unwrap().push(group);
        self
    }

    pub fn with_dashboard(self, dashboard: Dashboard) -> Self {
        self.dashboards.lock().unwrap().push(dashboard);
        self
    }

    pub fn stored_groups(&self) -> Vec<MetricGroup> {
        self.groups.lock().unwrap().clone()
    }

    pub fn stored_dashboards(&self) -> Vec<Dashboard> {
        self.dashboards.lock().unwrap().clone()
    }

    pub fn counters(&self) -> ApiCounters {
        self.counters.lock().unwrap().clone()
    }

    pub fn listing_calls(&self) -> u32 {
        self.listing_calls.load(Ordering::SeqCst)
    }

    fn check_listing(&self) -> MonitorResult<()> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .listing_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(MonitorError::Provisioning("API unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetricsApi for MemoryApi {
    async fn metric_groups(&self) -> MonitorResult<Vec<MetricGroup>> {
        Ok(self.stored_groups())
    }

    async fn create_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup> {
        if self.hanging_groups.contains(&group.name) {
            std::future::pending::<()>().await;
        }
        if self.failing_groups.contains(&group.name) {
            return Err(MonitorError::Provisioning(format!(
                "{} rejected",
                group.name
            )));
        }

        let mut created = group.clone();
        created.id = Some(group.name.clone());
        self.groups.lock().unwrap().push(created.clone());
        self.counters.lock().unwrap().groups_created += 1;
        Ok(created)
    }

    async fn update_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup> {
        let mut groups = self.groups.lock().unwrap();
        let existing = groups
            .iter_mut()
            .find(|existing| existing.id == group.id && existing.name == group.name)
            .ok_or_else(|| MonitorError::Provisioning(format!("no group {}", group.name)))?;
        *existing = group.clone();
        self.counters.lock().unwrap().groups_updated += 1;
        Ok(group.clone())
    }

    async fn dashboards(&self) -> MonitorResult<Vec<Dashboard>> {
        self.check_listing()?;
        if self.hanging_listing {
            std::future::pending::<()>().await;
        }
        Ok(self.dashboards.lock().unwrap().clone())
    }

    async fn create_dashboard(&self, dashboard: &Dashboard) -> MonitorResult<Dashboard> {
        let mut dashboards = self.dashboards.lock().unwrap();
        let mut created = dashboard.clone();
        created.id = Some((dashboards.len() + 1).to_string());
        dashboards.push(created.clone());
        self.counters.lock().unwrap().dashboards_created += 1;
        Ok(created)
    }
}

/// Collaborators using one source for every service
pub fn collaborators(
    api: Arc<MemoryApi>,
    sink: Arc<RecordingSink>,
    source: Arc<FakeSource>,
) -> Collaborators {
    let sources: SourceFactory = Arc::new(move |_: &ServiceDescriptor| {
        source.clone() as Arc<dyn DataSource>
    });

    Collaborators {
        api,
        sink,
        sources,
    }
}

/// Collaborators with a dedicated source per service name
pub fn collaborators_per_service(
    api: Arc<MemoryApi>,
    sink: Arc<RecordingSink>,
    sources: HashMap<String, Arc<FakeSource>>,
) -> Collaborators {
    let fallback = Arc::new(FakeSource::healthy());
    let factory: SourceFactory = Arc::new(move |service: &ServiceDescriptor| {
        sources
            .get(&service.name)
            .cloned()
            .unwrap_or_else(|| fallback.clone()) as Arc<dyn DataSource>
    });

    Collaborators {
        api,
        sink,
        sources: factory,
    }
}
