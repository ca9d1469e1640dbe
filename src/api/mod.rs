//! Remote monitoring API
//!
//! Two seams face the remote service:
//!
//! - [`MetricSink`]: used by the poll loop to deliver samples
//! - [`MetricsApi`]: used once at startup to provision metric groups and dashboards
//!
//! [`client::ApiClient`] implements both over HTTP.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::MetricSample;
use crate::error::MonitorResult;

pub use client::ApiClient;

/// Delivers samples to the remote service
///
/// Submissions are not idempotent, a sample submitted twice is stored twice.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn submit(&self, sample: &MetricSample) -> MonitorResult<()>;
}

/// Metric group and dashboard management on the remote service
#[async_trait]
pub trait MetricsApi: Send + Sync {
    async fn metric_groups(&self) -> MonitorResult<Vec<MetricGroup>>;

    async fn create_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup>;

    /// Replace the definition of an existing group (matched by `group.id`)
    async fn update_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup>;

    async fn dashboards(&self) -> MonitorResult<Vec<Dashboard>>;

    async fn create_dashboard(&self, dashboard: &Dashboard) -> MonitorResult<Dashboard>;
}

/// Remote definition of a metric group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricGroup {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub frequency: u64,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Aggregation type on the wire (`ce_gauge`, `ce_counter`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Accept identifiers sent either as strings or as numbers
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(id)) => Some(id),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}
