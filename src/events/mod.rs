//! Event payloads exchanged with the orchestration platform.
//!
//! The transport is deliberately thin: a JSON envelope with a `type`
//! discriminator, a correlation id and a `data` payload. The bridge only
//! reacts to `get-sli` events addressed at the `dynatrace` provider and
//! answers with a `get-sli.finished` event carrying one result per indicator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::SliError;

pub const GET_SLI_EVENT_TYPE: &str = "get-sli";
pub const GET_SLI_FINISHED_EVENT_TYPE: &str = "get-sli.finished";
pub const SLI_PROVIDER: &str = "dynatrace";
pub const EVENT_SOURCE: &str = "sli-bridge";

/// Envelope shared by ingress and egress events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "correlationId", default)]
    pub correlation_id: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Wrap a finished payload in a fresh envelope, propagating the
    /// correlation id of the request it answers.
    pub fn finished(correlation_id: &str, data: &GetSliFinishedData) -> Result<Self, SliError> {
        let data = serde_json::to_value(data)
            .map_err(|e| SliError::ParseResponse(e.to_string()))?;
        Ok(Self {
            event_type: GET_SLI_FINISHED_EVENT_TYPE.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: EVENT_SOURCE.to_string(),
            time: Some(Utc::now()),
            correlation_id: correlation_id.to_string(),
            data,
        })
    }
}

/// A single key/value filter passed along with the request, substituted into
/// queries as `$<key>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SliFilter {
    pub key: String,
    pub value: String,
}

/// Payload of the ingress `get-sli` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSliData {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub custom_filters: Vec<SliFilter>,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub deployment_strategy: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub sli_provider: String,
}

/// One retrieved indicator value. `message` is only populated on failure and
/// never contains credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SliResult {
    pub metric: String,
    pub value: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl SliResult {
    pub fn ok(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value: 0.0,
            success: false,
            message: message.into(),
        }
    }
}

/// Payload of the egress `get-sli.finished` event. Request metadata is echoed
/// back so downstream consumers can correlate without extra lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSliFinishedData {
    pub project: String,
    pub service: String,
    pub stage: String,
    pub indicator_values: Vec<SliResult>,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub test_strategy: String,
    #[serde(default)]
    pub deployment_strategy: String,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One pass/warning criteria group, e.g. `["<500ms", "<+10%"]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SloCriteria {
    pub criteria: Vec<String>,
}

/// One objective synthesized from a dashboard tile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SloDefinition {
    pub sli: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pass: Vec<SloCriteria>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warning: Vec<SloCriteria>,
    pub weight: i32,
    pub key_sli: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SloScore {
    pub pass: String,
    pub warning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SloComparison {
    pub compare_with: String,
    pub include_result_with_score: String,
    pub number_of_comparison_results: i32,
    pub aggregate_function: String,
}

/// The SLO header plus objectives, as consumers expect to persist it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceLevelObjectives {
    pub objectives: Vec<SloDefinition>,
    pub total_score: SloScore,
    pub comparison: SloComparison,
}

impl Default for ServiceLevelObjectives {
    fn default() -> Self {
        Self {
            objectives: Vec::new(),
            total_score: SloScore {
                pass: "90%".to_string(),
                warning: "75%".to_string(),
            },
            comparison: SloComparison {
                compare_with: "single_result".to_string(),
                include_result_with_score: "pass".to_string(),
                number_of_comparison_results: 1,
                aggregate_function: "avg".to_string(),
            },
        }
    }
}

/// Outbound side of the event transport.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &EventEnvelope) -> Result<(), SliError>;
}

/// Posts events to the event broker endpoint resolved at startup.
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &EventEnvelope) -> Result<(), SliError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SliError::VendorHttp {
                status: response.status().as_u16(),
                message: "event broker rejected the event".to_string(),
            });
        }
        Ok(())
    }
}

/// Local-mode sink: logs the results instead of emitting an event.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn send(&self, event: &EventEnvelope) -> Result<(), SliError> {
        if let Ok(data) = serde_json::from_value::<GetSliFinishedData>(event.data.clone()) {
            for v in &data.indicator_values {
                info!(
                    "{}:{:.2} - Success: {} - Error: {}",
                    v.metric, v.value, v.success, v.message
                );
            }
        }
        Ok(())
    }
}
