//! HTTP client for the remote monitoring API
//!
//! All requests authenticate with HTTP basic auth, the API key as user name
//! and a fixed password. The client is built once and shared by the
//! provisioner and every worker's poll loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{instrument, trace};

use crate::error::{MonitorError, MonitorResult};
use crate::{MetricSample, MetricValues};

use super::{Dashboard, MetricGroup, MetricSink, MetricsApi};

const API_PREFIX: &str = "v2/revealmetrics";

const API_PASSWORD: &str = "U";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    host: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct SamplePayload<'a> {
    identifier: &'a str,
    timestamp: i64,
    values: &'a MetricValues,
}

impl ApiClient {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> MonitorResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.host, API_PREFIX, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.api_key, Some(API_PASSWORD))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> MonitorResult<T> {
        let response = request.send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> MonitorResult<T> {
        self.send(self.request(method, path).json(body)).await
    }
}

#[async_trait]
impl MetricSink for ApiClient {
    #[instrument(skip_all, fields(group = %sample.group(), identifier = %sample.identifier()))]
    async fn submit(&self, sample: &MetricSample) -> MonitorResult<()> {
        let payload = SamplePayload {
            identifier: sample.identifier(),
            timestamp: sample.timestamp(),
            values: sample.values(),
        };

        let response = self
            .request(Method::POST, &format!("samples/{}.json", sample.group()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::Submit(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Submit(format!("HTTP {status}: {body}")));
        }

        trace!("sample accepted");
        Ok(())
    }
}

#[async_trait]
impl MetricsApi for ApiClient {
    async fn metric_groups(&self) -> MonitorResult<Vec<MetricGroup>> {
        self.send(self.request(Method::GET, "metric_groups.json"))
            .await
    }

    async fn create_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup> {
        self.send_json(Method::POST, "metric_groups.json", group)
            .await
    }

    async fn update_metric_group(&self, group: &MetricGroup) -> MonitorResult<MetricGroup> {
        let id = group.id.as_deref().unwrap_or(&group.name);
        self.send_json(Method::PUT, &format!("metric_groups/{id}.json"), group)
            .await
    }

    async fn dashboards(&self) -> MonitorResult<Vec<Dashboard>> {
        self.send(self.request(Method::GET, "dashboards.json")).await
    }

    async fn create_dashboard(&self, dashboard: &Dashboard) -> MonitorResult<Dashboard> {
        self.send_json(Method::POST, "dashboards.json", dashboard)
            .await
    }
}
