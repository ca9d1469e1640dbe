//! Remote-side prerequisites for each service
//!
//! Before a worker starts, its metric group must exist on the remote side
//! with the service's field table and cadence, and a dashboard showing the
//! group must exist. Provisioning is idempotent: existing groups are updated
//! in place and existing dashboards are reused, so running it again never
//! creates duplicates.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::api::{Dashboard, MetricDefinition, MetricGroup, MetricsApi};
use crate::collector::FieldSpec;
use crate::config::ServiceDescriptor;
use crate::error::{MonitorError, MonitorResult};

/// Attempts for the initial listing of remote definitions
pub const MAX_SETUP_RETRIES: u32 = 5;

pub const SETUP_RETRY_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct SetupOptions {
    pub max_attempts: u32,
    pub pause: Duration,

    /// Fail on the first error instead of retrying
    pub debug: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SETUP_RETRIES,
            pause: SETUP_RETRY_PAUSE,
            debug: false,
        }
    }
}

/// Opaque reference to a provisioned metric group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHandle {
    pub id: Option<String>,

    /// Name samples are submitted under
    pub name: String,
}

pub struct Provisioner {
    api: Arc<dyn MetricsApi>,
    groups: Vec<MetricGroup>,
    dashboards: Vec<Dashboard>,
}

impl Provisioner {
    /// Load the existing metric groups and dashboards.
    ///
    /// Retried up to `options.max_attempts` times, the last error is returned
    /// once the attempts are used up.
    pub async fn connect(api: Arc<dyn MetricsApi>, options: SetupOptions) -> MonitorResult<Self> {
        let mut remaining = options.max_attempts.max(1);

        loop {
            match Self::load(api.as_ref()).await {
                Ok((groups, dashboards)) => {
                    debug!(
                        "found {} metric groups and {} dashboards",
                        groups.len(),
                        dashboards.len()
                    );
                    return Ok(Self {
                        api,
                        groups,
                        dashboards,
                    });
                }
                Err(e) => {
                    remaining -= 1;
                    if options.debug || remaining == 0 {
                        return Err(e);
                    }
                    warn!("error connecting to the API: {e}, retrying ({remaining}) more times");
                    tokio::time::sleep(options.pause).await;
                }
            }
        }
    }

    async fn load(api: &dyn MetricsApi) -> MonitorResult<(Vec<MetricGroup>, Vec<Dashboard>)> {
        let dashboards = api.dashboards().await?;
        let groups = api.metric_groups().await?;
        Ok((groups, dashboards))
    }

    /// Ensure the metric group and dashboard of `service` exist.
    #[instrument(skip_all, fields(service = %service.name))]
    pub async fn provision(&mut self, service: &ServiceDescriptor) -> MonitorResult<GroupHandle> {
        let group = self
            .ensure_metric_group(service)
            .await
            .map_err(|e| provisioning_error(service, "metric group", e))?;

        self.ensure_dashboard(service, &group)
            .await
            .map_err(|e| provisioning_error(service, "dashboard", e))?;

        Ok(GroupHandle {
            id: group.id,
            name: group.name,
        })
    }

    /// Create the service's metric group, or bring an existing one up to date.
    pub async fn ensure_metric_group(
        &mut self,
        service: &ServiceDescriptor,
    ) -> MonitorResult<MetricGroup> {
        let metrics = metric_definitions(service.field_table());

        let existing = self
            .groups
            .iter()
            .position(|group| group.name == service.group_name);

        match existing {
            Some(index) => {
                info!("updating metric group {}", service.group_name);
                let mut group = self.groups[index].clone();
                group.frequency = service.frequency;
                group.metrics = metrics;

                let updated = self.api.update_metric_group(&group).await?;
                self.groups[index] = updated.clone();
                Ok(updated)
            }
            None => {
                info!("creating metric group {}", service.group_name);
                let group = MetricGroup {
                    id: None,
                    name: service.group_name.clone(),
                    label: service.group_label.clone(),
                    frequency: service.frequency,
                    metrics,
                };

                let created = self.api.create_metric_group(&group).await?;
                self.groups.push(created.clone());
                Ok(created)
            }
        }
    }

    /// Reuse the dashboard named after the service, creating it if missing.
    pub async fn ensure_dashboard(
        &mut self,
        service: &ServiceDescriptor,
        group: &MetricGroup,
    ) -> MonitorResult<Dashboard> {
        if let Some(dashboard) = self
            .dashboards
            .iter()
            .find(|dashboard| dashboard.name == service.dashboard)
        {
            debug!("dashboard {} already exists", service.dashboard);
            return Ok(dashboard.clone());
        }

        info!("creating dashboard {}", service.dashboard);
        let created = self
            .api
            .create_dashboard(&dashboard_for(&service.dashboard, group))
            .await?;
        self.dashboards.push(created.clone());
        Ok(created)
    }
}

fn provisioning_error(service: &ServiceDescriptor, what: &str, e: MonitorError) -> MonitorError {
    MonitorError::Provisioning(format!(
        "could not establish {what} for {}: {e}",
        service.name
    ))
}

pub fn metric_definitions(table: &[FieldSpec]) -> Vec<MetricDefinition> {
    table
        .iter()
        .enumerate()
        .map(|(position, field)| MetricDefinition {
            kind: field.kind.as_str().to_string(),
            name: field.name.to_string(),
            unit: field.unit.to_string(),
            position: Some(position as u32),
        })
        .collect()
}

/// Dashboard with one timeline widget per metric, across all identifiers.
pub fn dashboard_for(name: &str, group: &MetricGroup) -> Dashboard {
    let mut widgets = serde_json::Map::new();
    let mut order = Vec::new();

    for (index, metric) in group.metrics.iter().enumerate() {
        let key = index.to_string();
        let position = metric.position.unwrap_or(index as u32);
        widgets.insert(
            key.clone(),
            json!({
                "type": "metric",
                "style": "timeline",
                "match": "all",
                "metric": [group.name, position, metric.name],
            }),
        );
        order.push(key);
    }

    Dashboard {
        id: None,
        name: name.to_string(),
        data: json!({ "widgets": widgets, "order": order }),
    }
}
