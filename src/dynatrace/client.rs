//! Authenticated access to the Dynatrace REST API.
//!
//! `MetricsApi` is the seam the compiler and resolver work against; the
//! reqwest-backed `DynatraceClient` is the production implementation. Clients
//! are cheap and built per request.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::types::{
    ApiErrorEnvelope, Dashboard, DashboardList, MetricDefinition, MetricsResult, UsqlResult,
};
use crate::config;
use crate::credentials::DtCredentials;
use crate::error::SliError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Vendor API operations the core depends on.
#[async_trait]
pub trait MetricsApi: Send + Sync {
    /// Base tenant URL, used to compose query URLs and deep links.
    fn api_url(&self) -> &str;

    async fn describe_metric(&self, metric_id: &str) -> Result<MetricDefinition, SliError>;

    async fn query_metrics(&self, url: &str) -> Result<MetricsResult, SliError>;

    async fn query_usql(&self, url: &str) -> Result<UsqlResult, SliError>;

    async fn list_dashboards(&self) -> Result<DashboardList, SliError>;

    async fn get_dashboard(&self, id: &str) -> Result<Dashboard, SliError>;
}

pub struct DynatraceClient {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    extra_headers: Vec<(String, String)>,
}

impl DynatraceClient {
    pub fn new(credentials: &DtCredentials) -> Result<Self, SliError> {
        let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
        if !config::http_ssl_verification_enabled() {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            client: builder.build()?,
            api_url: credentials.tenant.trim_end_matches('/').to_string(),
            api_token: credentials.api_token.clone(),
            extra_headers: Vec::new(),
        })
    }

    /// Adds a caller-supplied header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SliError> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url)
            .header("Authorization", format!("Api-Token {}", self.api_token))
            .header("Content-Type", "application/json");
        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // surface the vendor's own code and message when the body is the
            // documented error envelope
            if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&body) {
                if !envelope.error.message.is_empty() {
                    return Err(SliError::VendorHttp {
                        status: u16::try_from(envelope.error.code).unwrap_or(status.as_u16()),
                        message: envelope.error.message,
                    });
                }
            }
            return Err(SliError::VendorHttp {
                status: status.as_u16(),
                message: "no error details in response body".to_string(),
            });
        }

        serde_json::from_str(&body).map_err(|e| SliError::ParseResponse(e.to_string()))
    }
}

#[async_trait]
impl MetricsApi for DynatraceClient {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn describe_metric(&self, metric_id: &str) -> Result<MetricDefinition, SliError> {
        self.get_json(&format!("{}/api/v2/metrics/{}", self.api_url, metric_id))
            .await
    }

    async fn query_metrics(&self, url: &str) -> Result<MetricsResult, SliError> {
        let result: MetricsResult = self.get_json(url).await?;
        if result.result.is_empty() {
            return Err(SliError::VendorEmpty("metrics query".to_string()));
        }
        Ok(result)
    }

    async fn query_usql(&self, url: &str) -> Result<UsqlResult, SliError> {
        let result: UsqlResult = self.get_json(url).await?;
        if result.values.is_empty() {
            return Err(SliError::VendorEmpty("user session query".to_string()));
        }
        Ok(result)
    }

    async fn list_dashboards(&self) -> Result<DashboardList, SliError> {
        self.get_json(&format!("{}/api/config/v1/dashboards", self.api_url))
            .await
    }

    async fn get_dashboard(&self, id: &str) -> Result<Dashboard, SliError> {
        self.get_json(&format!("{}/api/config/v1/dashboards/{}", self.api_url, id))
            .await
    }
}
