//! Indicator resolution and single-value retrieval.
//!
//! An indicator name resolves to a query string: custom entries from
//! `sli.yaml` win, then the built-in defaults, then it is an error. Query
//! strings come in three encodings: a plain metrics-API query, `MV2;` with an
//! explicit unit, and `USQL;` for user-session queries.

use tracing::debug;

use super::query::{build_metrics_query, build_usql_query, is_matching_metric_id};
use super::types::UsqlCell;
use super::units::scale_value;
use super::SliProvider;
use crate::error::SliError;

pub const THROUGHPUT: &str = "throughput";
pub const ERROR_RATE: &str = "error_rate";
pub const RESPONSE_TIME_P50: &str = "response_time_p50";
pub const RESPONSE_TIME_P90: &str = "response_time_p90";
pub const RESPONSE_TIME_P95: &str = "response_time_p95";

/// The built-in metrics-v2 query for an indicator name, if it has one. All
/// defaults are service-scoped and select entities by the keptn_* tags.
pub fn default_query(indicator: &str) -> Option<&'static str> {
    match indicator {
        THROUGHPUT => Some("metricSelector=builtin:service.requestCount.total:merge(0):sum&entitySelector=type(SERVICE),tag(keptn_project:$PROJECT),tag(keptn_stage:$STAGE),tag(keptn_service:$SERVICE),tag(keptn_deployment:$DEPLOYMENT)"),
        ERROR_RATE => Some("metricSelector=builtin:service.errors.total.count:merge(0):avg&entitySelector=type(SERVICE),tag(keptn_project:$PROJECT),tag(keptn_stage:$STAGE),tag(keptn_service:$SERVICE),tag(keptn_deployment:$DEPLOYMENT)"),
        RESPONSE_TIME_P50 => Some("metricSelector=builtin:service.response.time:merge(0):percentile(50)&entitySelector=type(SERVICE),tag(keptn_project:$PROJECT),tag(keptn_stage:$STAGE),tag(keptn_service:$SERVICE),tag(keptn_deployment:$DEPLOYMENT)"),
        RESPONSE_TIME_P90 => Some("metricSelector=builtin:service.response.time:merge(0):percentile(90)&entitySelector=type(SERVICE),tag(keptn_project:$PROJECT),tag(keptn_stage:$STAGE),tag(keptn_service:$SERVICE),tag(keptn_deployment:$DEPLOYMENT)"),
        RESPONSE_TIME_P95 => Some("metricSelector=builtin:service.response.time:merge(0):percentile(95)&entitySelector=type(SERVICE),tag(keptn_project:$PROJECT),tag(keptn_stage:$STAGE),tag(keptn_service:$SERVICE),tag(keptn_deployment:$DEPLOYMENT)"),
        _ => None,
    }
}

/// Replaces characters that would make an indicator name invalid downstream.
pub fn clean_indicator_name(name: &str) -> String {
    name.replace([' ', '/', '%'], "_")
}

/// Interprets one USQL result row according to the tile type, yielding the
/// dimension name (empty for single values) and the numeric value. Rows whose
/// cells do not carry the expected types yield `None`.
pub fn usql_row_value(tile_type: &str, row: &[UsqlCell]) -> Option<(String, f64)> {
    match tile_type {
        "SINGLE_VALUE" => Some((String::new(), row.first()?.as_f64()?)),
        "PIE_CHART" | "COLUMN_CHART" => Some((
            row.first()?.as_str()?.to_string(),
            row.get(1)?.as_f64()?,
        )),
        "TABLE" => Some((
            row.first()?.as_str()?.to_string(),
            row.last()?.as_f64()?,
        )),
        _ => None,
    }
}

impl SliProvider {
    /// The query string for an indicator: custom map first, then built-ins.
    pub fn resolve_query(&self, indicator: &str) -> Result<String, SliError> {
        if let Some(query) = self.custom_queries.get(indicator) {
            return Ok(query.clone());
        }
        default_query(indicator)
            .map(str::to_string)
            .ok_or_else(|| SliError::UnknownSli(indicator.to_string()))
    }

    /// Retrieves one indicator value for the time window, dispatching on the
    /// query encoding.
    pub async fn get_sli_value(
        &self,
        indicator: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<f64, SliError> {
        let query = self.resolve_query(indicator)?;
        debug!("retrieved SLI config for {}: {}", indicator, query);

        if query.starts_with("USQL;") {
            self.usql_sli_value(indicator, &query, start_ms, end_ms).await
        } else {
            self.metrics_sli_value(indicator, &query, start_ms, end_ms).await
        }
    }

    /// `USQL;<tileType>;<dimension>;<raw query>`: runs the query and picks
    /// the row whose dimension matches the requested one.
    async fn usql_sli_value(
        &self,
        indicator: &str,
        query: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<f64, SliError> {
        let parts: Vec<&str> = query.splitn(4, ';').collect();
        if parts.len() != 4 {
            return Err(SliError::parse_config(
                indicator,
                format!("USQL query has incorrect format: {}", query),
            ));
        }
        let tile_type = parts[1];
        let requested_dimension = parts[2];
        let raw_usql = parts[3];

        let url = build_usql_query(
            self.api.api_url(),
            raw_usql,
            start_ms,
            end_ms,
            &self.context,
            self.secrets.as_ref(),
        )
        .await;
        let result = self.api.query_usql(&url).await?;

        for row in &result.values {
            let (dimension, value) = match usql_row_value(tile_type, row) {
                Some(entry) => entry,
                None => {
                    debug!("skipping USQL row not matching tile type {}", tile_type);
                    continue;
                }
            };
            if dimension == requested_dimension {
                return Ok(value);
            }
        }

        Err(SliError::VendorEmpty(format!(
            "not able to query identifier {} from Dynatrace",
            indicator
        )))
    }

    /// Plain or `MV2;<unit>;`-prefixed metrics query: runs it, requires
    /// exactly one data entry for the matching metric, scales the value.
    async fn metrics_sli_value(
        &self,
        indicator: &str,
        query: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<f64, SliError> {
        let (unit, query) = match query.strip_prefix("MV2;") {
            Some(rest) => match rest.find(';') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => {
                    return Err(SliError::parse_config(
                        indicator,
                        format!("MV2 query is missing its unit separator: {}", query),
                    ))
                }
            },
            None => ("", query),
        };

        let (url, metric_selector) = build_metrics_query(
            self.api.api_url(),
            query,
            start_ms,
            end_ms,
            &self.context,
            self.secrets.as_ref(),
        )
        .await;
        let result = self.api.query_metrics(&url).await?;

        for series in &result.result {
            if !is_matching_metric_id(&series.metric_id, &metric_selector) {
                continue;
            }
            if series.data.len() != 1 {
                let dump = serde_json::to_string(series).unwrap_or_default();
                return Err(SliError::ParseResponse(format!(
                    "Dynatrace Metrics API returned {} result values, expected 1. Please ensure the response contains exactly one value (e.g., by using :merge(0):avg for the metric). Here is the output for troubleshooting: {}",
                    series.data.len(),
                    dump
                )));
            }
            let value = series.data[0].values.first().copied().ok_or_else(|| {
                SliError::VendorEmpty(format!("metric {} carries no values", series.metric_id))
            })?;
            return Ok(scale_value(&metric_selector, unit, value));
        }

        Err(SliError::VendorEmpty(format!(
            "not able to query identifier {} from Dynatrace",
            indicator
        )))
    }
}
