//! Query compilation: placeholder expansion, legacy-format rewrites and the
//! final metrics-API / USQL URLs.
//!
//! Query strings are never concatenated blindly: parameters are parsed into
//! pairs, amended, and re-encoded, so ordering and escaping survive a
//! round-trip.

use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::credentials::SecretStore;
use crate::error::SliError;
use crate::events::{EventEnvelope, GetSliData, SliFilter};

/// Reference for the old-format to new-format query migration, linked from
/// compatibility warnings.
const QUERY_FORMAT_MIGRATION_DOC: &str =
    "https://github.com/keptn-contrib/dynatrace-sli-service/blob/master/docs/CustomQueryFormatMigration.md";

/// Everything placeholder expansion can draw from for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub project: String,
    pub stage: String,
    pub service: String,
    pub deployment: String,
    pub test_strategy: String,
    pub correlation_id: String,
    pub event: String,
    pub source: String,
    pub labels: HashMap<String, String>,
    pub custom_filters: Vec<SliFilter>,
}

impl RequestContext {
    pub fn from_event(data: &GetSliData, envelope: &EventEnvelope) -> Self {
        Self {
            project: data.project.clone(),
            stage: data.stage.clone(),
            service: data.service.clone(),
            deployment: data.deployment.clone(),
            test_strategy: data.test_strategy.clone(),
            correlation_id: envelope.correlation_id.clone(),
            event: envelope.event_type.clone(),
            source: envelope.source.clone(),
            labels: data.labels.clone(),
            custom_filters: data.custom_filters.clone(),
        }
    }
}

lazy_static! {
    static ref LABEL_PLACEHOLDER: Regex = Regex::new(r"\$LABEL\.([A-Za-z0-9_-]+)").unwrap();
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$ENV\.([A-Za-z0-9_]+)").unwrap();
    static ref SECRET_PLACEHOLDER: Regex = Regex::new(r"\$SECRET\.([A-Za-z0-9_.-]+)").unwrap();
}

/// Replaces every recognized `$` token in `query`.
///
/// Custom-filter keys go first (both as-is and uppercased, quotes stripped
/// from the value) so a key like `$SERVICENAME` is consumed before the
/// shorter built-in `$SERVICE` can match inside it. Built-ins are applied
/// longest token first for the same reason. `$SECRET.x` lookups that fail
/// substitute the empty string and never raise.
pub async fn expand_placeholders(
    query: &str,
    ctx: &RequestContext,
    secrets: &dyn SecretStore,
) -> String {
    let mut result = query.to_string();

    for filter in &ctx.custom_filters {
        let value = filter.value.replace(['\'', '"'], "");
        result = result.replace(&format!("${}", filter.key), &value);
        result = result.replace(&format!("${}", filter.key.to_uppercase()), &value);
    }

    for (token, value) in [
        ("$TESTSTRATEGY", ctx.test_strategy.as_str()),
        ("$DEPLOYMENT", ctx.deployment.as_str()),
        ("$PROJECT", ctx.project.as_str()),
        ("$SERVICE", ctx.service.as_str()),
        ("$CONTEXT", ctx.correlation_id.as_str()),
        ("$SOURCE", ctx.source.as_str()),
        ("$EVENT", ctx.event.as_str()),
        ("$STAGE", ctx.stage.as_str()),
    ] {
        result = result.replace(token, value);
    }

    result = LABEL_PLACEHOLDER
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            ctx.labels.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned();

    result = ENV_PLACEHOLDER
        .replace_all(&result, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned();

    let secret_names: Vec<String> = SECRET_PLACEHOLDER
        .captures_iter(&result)
        .map(|caps| caps[1].to_string())
        .collect();
    for name in secret_names {
        let value = secret_value(secrets, &name).await;
        result = result.replace(&format!("$SECRET.{}", name), &value);
    }

    result
}

/// Resolves a `$SECRET.x` token: the secret's single entry when it has
/// exactly one, empty otherwise.
async fn secret_value(secrets: &dyn SecretStore, name: &str) -> String {
    match secrets.fetch_secret(name).await {
        Ok(Some(secret)) if secret.len() == 1 => secret.into_values().next().unwrap_or_default(),
        Ok(_) => String::new(),
        Err(e) => {
            warn!("could not resolve $SECRET.{}: {}", name, e);
            String::new()
        }
    }
}

/// Ordered query parameters with strict parse/encode round-tripping.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw query-parameter string, percent-decoding keys and values
    /// and keeping the original pair order.
    pub fn parse(raw: &str) -> Self {
        let mut pairs = Vec::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.find('=') {
                Some(idx) => (&pair[..idx], &pair[idx + 1..]),
                None => (pair, ""),
            };
            pairs.push((decode_component(key), decode_component(value)));
        }
        Self { pairs }
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Re-encodes in insertion order.
    pub fn encode(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode_component(component: &str) -> String {
    let component = component.replace('+', " ");
    match urlencoding::decode(&component) {
        Ok(Cow::Borrowed(s)) => s.to_string(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => component,
    }
}

/// Percent-encodes only the characters that would break parameter framing.
/// Selector syntax (`:`, `(`, `)`, `,`, quotes) stays readable, matching the
/// URLs the vendor documents.
fn encode_component(component: &str) -> String {
    let mut encoded = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            ' ' => encoded.push_str("%20"),
            '%' => encoded.push_str("%25"),
            '&' => encoded.push_str("%26"),
            '+' => encoded.push_str("%2B"),
            '#' => encoded.push_str("%23"),
            '=' => encoded.push_str("%3D"),
            '?' => encoded.push_str("%3F"),
            _ => encoded.push(ch),
        }
    }
    encoded
}

/// Builds the full metrics-API query URL for a time window.
///
/// Handles the legacy formats: a leading `?metricSelector=` is stripped, a
/// `selector?params` split is rewritten into an explicit `metricSelector`
/// parameter, and a `scope=` parameter is migrated to `entitySelector=`
/// (gaining `type(SERVICE)` when missing). Returns the URL and the metric
/// selector the response is expected to report.
pub async fn build_metrics_query(
    api_url: &str,
    raw_query: &str,
    start_ms: i64,
    end_ms: i64,
    ctx: &RequestContext,
    secrets: &dyn SecretStore,
) -> (String, String) {
    let mut query = expand_placeholders(raw_query, ctx, secrets).await;

    if query.starts_with("?metricSelector=") {
        warn!(
            "COMPATIBILITY WARNING: query '{}' has a leading '?', auto-removing it (see {})",
            query, QUERY_FORMAT_MIGRATION_DOC
        );
        query.remove(0);
    }

    // old format: "selector:transformations()?scope=..." - everything left of
    // the '?' is the metric selector, everything right are query parameters
    let (legacy_selector, param_string) = match query.find('?') {
        None => (String::new(), query.clone()),
        Some(idx) => {
            warn!(
                "COMPATIBILITY WARNING: query '{}' still uses the old format (see {})",
                query, QUERY_FORMAT_MIGRATION_DOC
            );
            let selector = query[..idx].to_string();
            let params = format!("metricSelector={}&{}", selector, &query[idx + 1..]);
            (selector, params)
        }
    };

    let mut params = QueryParams::parse(&param_string);
    // resolution=Inf collapses the window into a single datapoint per entity
    params.append("resolution", "Inf");
    params.append("from", start_ms.to_string());
    params.append("to", end_ms.to_string());

    if let Some(scope) = params.get("scope").map(str::to_string) {
        if !scope.is_empty() {
            warn!(
                "COMPATIBILITY WARNING: scope=... is deprecated, use entitySelector=... (see {})",
                QUERY_FORMAT_MIGRATION_DOC
            );
            let entity_selector = if scope.contains("type(SERVICE)") {
                scope
            } else {
                warn!(
                    "COMPATIBILITY WARNING: automatically adding type(SERVICE) to entitySelector (see {})",
                    QUERY_FORMAT_MIGRATION_DOC
                );
                format!("{},type(SERVICE)", scope)
            };
            params.append("entitySelector", entity_selector);
        }
    }

    let metric_selector = if legacy_selector.is_empty() {
        params.get("metricSelector").unwrap_or_default().to_string()
    } else {
        legacy_selector
    };

    let url = format!("{}/api/v2/metrics/query/?{}", api_url, params.encode());
    debug!("final metrics query: {}", url);
    (url, metric_selector)
}

/// Builds the full USQL endpoint URL for a raw user-session query.
pub async fn build_usql_query(
    api_url: &str,
    raw_query: &str,
    start_ms: i64,
    end_ms: i64,
    ctx: &RequestContext,
    secrets: &dyn SecretStore,
) -> String {
    let usql = expand_placeholders(raw_query, ctx, secrets).await;

    let mut params = QueryParams::new();
    params.append("query", usql);
    params.append("explain", "false");
    params.append("addDeepLinkFields", "false");
    params.append("startTimestamp", start_ms.to_string());
    params.append("endTimestamp", end_ms.to_string());

    let url = format!(
        "{}/api/v1/userSessionQueryLanguage/table?{}",
        api_url,
        params.encode()
    );
    debug!("final USQL query: {}", url);
    url
}

/// Matches a response `metricId` against the selector the query asked for.
///
/// Filter expressions escape dotted dimension names with `~` in the response,
/// so exact comparison can fail for queries that match fine. Fallback: when
/// the response id contains `~`, compare only the part before the first `:`.
pub fn is_matching_metric_id(result_metric_id: &str, query_metric_id: &str) -> bool {
    if result_metric_id == query_metric_id {
        return true;
    }

    if result_metric_id.contains('~') {
        debug!(
            "fuzzy-matching metric ids '{}' and '{}'",
            result_metric_id, query_metric_id
        );
        if result_metric_id.contains(':') && query_metric_id.contains(':') {
            let result_prefix = result_metric_id.split(':').next().unwrap_or_default();
            let query_prefix = query_metric_id.split(':').next().unwrap_or_default();
            return result_prefix == query_prefix;
        }
    }

    false
}

/// Converts the event's ISO-8601 window bounds into the epoch-millisecond
/// representation vendor URLs use.
pub fn parse_time_window(start: &str, end: &str) -> Result<(i64, i64), SliError> {
    let start_ms = parse_timestamp(start)?;
    let end_ms = parse_timestamp(end)?;
    Ok((start_ms, end_ms))
}

fn parse_timestamp(value: &str) -> Result<i64, SliError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SliError::ParseResponse(format!("invalid timestamp '{}': {}", value, e)))
}
