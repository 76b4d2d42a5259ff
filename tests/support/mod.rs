//! Shared fixtures for the integration suites: an in-process `MetricsApi`
//! mock, port mocks for secrets/resources/events, and an HTTP stub standing
//! in for the vendor tenant.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use sli_bridge::credentials::SecretStore;
use sli_bridge::config::ResourceStore;
use sli_bridge::dynatrace::types::{
    Dashboard, DashboardList, DashboardStub, MetricData, MetricDefinition, MetricSeries,
    MetricsResult, UsqlCell, UsqlResult,
};
use sli_bridge::dynatrace::{MetricsApi, RequestContext};
use sli_bridge::error::SliError;
use sli_bridge::events::{EventEnvelope, EventSink};

pub const MOCK_TENANT: &str = "https://mock.tenant";

/// Canned vendor answers, matched by URL substring.
pub enum Canned<T> {
    Ok(T),
    Http { status: u16, message: String },
    Empty,
}

impl<T: Clone> Canned<T> {
    fn produce(&self, what: &str) -> Result<T, SliError> {
        match self {
            Canned::Ok(value) => Ok(value.clone()),
            Canned::Http { status, message } => Err(SliError::VendorHttp {
                status: *status,
                message: message.clone(),
            }),
            Canned::Empty => Err(SliError::VendorEmpty(what.to_string())),
        }
    }
}

#[derive(Default)]
pub struct MockMetricsApi {
    pub definitions: HashMap<String, MetricDefinition>,
    pub metrics_rules: Vec<(String, Canned<MetricsResult>)>,
    pub usql_rules: Vec<(String, Canned<UsqlResult>)>,
    pub dashboards: Vec<DashboardStub>,
    pub dashboard: Option<Dashboard>,
    pub metrics_urls: Mutex<Vec<String>>,
    pub usql_urls: Mutex<Vec<String>>,
}

impl MockMetricsApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(mut self, metric: &str, definition: MetricDefinition) -> Self {
        self.definitions.insert(metric.to_string(), definition);
        self
    }

    /// Answers metrics queries whose URL contains `fragment`.
    pub fn on_metrics(mut self, fragment: &str, response: Canned<MetricsResult>) -> Self {
        self.metrics_rules.push((fragment.to_string(), response));
        self
    }

    pub fn on_usql(mut self, fragment: &str, response: Canned<UsqlResult>) -> Self {
        self.usql_rules.push((fragment.to_string(), response));
        self
    }

    pub fn with_dashboard(mut self, dashboard: Dashboard) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    pub fn with_dashboard_listing(mut self, dashboards: Vec<DashboardStub>) -> Self {
        self.dashboards = dashboards;
        self
    }

    pub fn captured_metrics_urls(&self) -> Vec<String> {
        self.metrics_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsApi for MockMetricsApi {
    fn api_url(&self) -> &str {
        MOCK_TENANT
    }

    async fn describe_metric(&self, metric_id: &str) -> Result<MetricDefinition, SliError> {
        self.definitions
            .get(metric_id)
            .cloned()
            .ok_or_else(|| SliError::VendorHttp {
                status: 404,
                message: format!("metric {} not found", metric_id),
            })
    }

    async fn query_metrics(&self, url: &str) -> Result<MetricsResult, SliError> {
        self.metrics_urls.lock().unwrap().push(url.to_string());
        for (fragment, response) in &self.metrics_rules {
            if url.contains(fragment.as_str()) {
                return response.produce("metrics query");
            }
        }
        Err(SliError::VendorEmpty("metrics query".to_string()))
    }

    async fn query_usql(&self, url: &str) -> Result<UsqlResult, SliError> {
        self.usql_urls.lock().unwrap().push(url.to_string());
        for (fragment, response) in &self.usql_rules {
            if url.contains(fragment.as_str()) {
                return response.produce("user session query");
            }
        }
        Err(SliError::VendorEmpty("user session query".to_string()))
    }

    async fn list_dashboards(&self) -> Result<DashboardList, SliError> {
        Ok(DashboardList {
            dashboards: self.dashboards.clone(),
        })
    }

    async fn get_dashboard(&self, id: &str) -> Result<Dashboard, SliError> {
        self.dashboard.clone().ok_or_else(|| SliError::VendorHttp {
            status: 404,
            message: format!("dashboard {} not found", id),
        })
    }
}

/// One metric series with a single data entry.
pub fn single_value_result(metric_id: &str, value: f64) -> MetricsResult {
    MetricsResult {
        total_count: 1,
        next_page_key: None,
        result: vec![MetricSeries {
            metric_id: metric_id.to_string(),
            data: vec![MetricData {
                dimensions: vec![],
                timestamps: vec![0],
                values: vec![value],
            }],
        }],
    }
}

/// One metric series with one data entry per (dimensions, values) pair.
pub fn dimensional_result(metric_id: &str, entries: &[(&[&str], &[f64])]) -> MetricsResult {
    MetricsResult {
        total_count: entries.len() as i64,
        next_page_key: None,
        result: vec![MetricSeries {
            metric_id: metric_id.to_string(),
            data: entries
                .iter()
                .map(|(dimensions, values)| MetricData {
                    dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
                    timestamps: vec![0],
                    values: values.to_vec(),
                })
                .collect(),
        }],
    }
}

pub fn usql_table(rows: Vec<Vec<UsqlCell>>) -> UsqlResult {
    UsqlResult {
        extrapolation_level: 1,
        column_names: vec![],
        values: rows,
    }
}

pub fn text(value: &str) -> UsqlCell {
    UsqlCell::Text(value.to_string())
}

pub fn number(value: f64) -> UsqlCell {
    UsqlCell::Number(value)
}

pub fn request_context() -> RequestContext {
    RequestContext {
        project: "sockshop".into(),
        stage: "staging".into(),
        service: "carts".into(),
        deployment: "direct".into(),
        test_strategy: "performance".into(),
        correlation_id: "ctx-42".into(),
        event: "get-sli".into(),
        source: "sli-bridge".into(),
        labels: HashMap::new(),
        custom_filters: Vec::new(),
    }
}

/// Secret store answering from an in-memory map.
pub struct MockSecretStore {
    pub secrets: HashMap<String, HashMap<String, String>>,
}

impl MockSecretStore {
    pub fn empty() -> Self {
        Self {
            secrets: HashMap::new(),
        }
    }

    /// A store holding one complete credential triple under the global
    /// fallback name.
    pub fn with_default_credentials(tenant: &str) -> Self {
        Self {
            secrets: HashMap::from([(
                "dynatrace".to_string(),
                HashMap::from([
                    ("DT_TENANT".to_string(), tenant.to_string()),
                    ("DT_API_TOKEN".to_string(), "mock-api-token".to_string()),
                    ("DT_PAAS_TOKEN".to_string(), "mock-paas-token".to_string()),
                ]),
            )]),
        }
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn fetch_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, SliError> {
        Ok(self.secrets.get(name).cloned())
    }
}

/// Resource store answering from a path → content map at service scope.
pub struct MockResourceStore {
    pub resources: HashMap<String, String>,
}

impl MockResourceStore {
    pub fn empty() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, path: &str, content: &str) -> Self {
        self.resources.insert(path.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl ResourceStore for MockResourceStore {
    async fn service_resource(
        &self,
        _project: &str,
        _stage: &str,
        _service: &str,
        path: &str,
    ) -> Result<Option<String>, SliError> {
        Ok(self.resources.get(path).cloned())
    }

    async fn stage_resource(
        &self,
        _project: &str,
        _stage: &str,
        _path: &str,
    ) -> Result<Option<String>, SliError> {
        Ok(None)
    }

    async fn project_resource(
        &self,
        _project: &str,
        _path: &str,
    ) -> Result<Option<String>, SliError> {
        Ok(None)
    }
}

/// Event sink capturing everything sent through it.
#[derive(Default)]
pub struct CapturingSink {
    pub events: Mutex<Vec<EventEnvelope>>,
}

#[async_trait]
impl EventSink for CapturingSink {
    async fn send(&self, event: &EventEnvelope) -> Result<(), SliError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Binds an in-process HTTP stub for the vendor tenant and returns its base
/// URL.
pub async fn spawn_vendor_stub(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
