//! Top-level request driver.
//!
//! One `get-sli` event runs end to end on one task: resolve config and
//! credentials, then either compile the configured dashboard or fan out over
//! the requested indicators, and finally emit the `get-sli.finished` event.
//! Credential or config failures abort the request before any vendor call;
//! per-indicator failures are folded into the result list instead.

use futures_util::{stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::resources::{
    load_custom_queries, load_dashboard_snapshot, load_service_config, ResourceStore,
};
use crate::config::ServiceConfig;
use crate::credentials::{resolve_credentials, SecretStore};
use crate::dynatrace::{
    parse_time_window, DashboardOutcome, DynatraceClient, RequestContext, SliProvider,
};
use crate::error::SliError;
use crate::events::{
    EventEnvelope, EventSink, GetSliData, GetSliFinishedData, SliResult, GET_SLI_EVENT_TYPE,
    SLI_PROVIDER,
};

/// Fan-out bound for per-indicator vendor queries within one request.
pub const MAX_PARALLEL_QUERIES: usize = 4;

/// Label under which the dashboard deep link is reported back.
const DASHBOARD_LABEL: &str = "Dashboard";

pub struct SliEventHandler {
    secrets: Arc<dyn SecretStore>,
    resources: Arc<dyn ResourceStore>,
    sink: Arc<dyn EventSink>,
}

impl SliEventHandler {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        resources: Arc<dyn ResourceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            secrets,
            resources,
            sink,
        }
    }

    /// Handles one incoming event. Events of other types or for other SLI
    /// providers are acknowledged without action.
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<(), SliError> {
        if envelope.event_type != GET_SLI_EVENT_TYPE {
            debug!("ignoring event of type '{}'", envelope.event_type);
            return Ok(());
        }

        let data: GetSliData = serde_json::from_value(envelope.data.clone())
            .map_err(|e| SliError::ParseResponse(e.to_string()))?;

        if data.sli_provider != SLI_PROVIDER {
            debug!("ignoring event for SLI provider '{}'", data.sli_provider);
            return Ok(());
        }

        info!(
            "retrieving Dynatrace timeseries metrics for {}/{}/{}",
            data.project, data.stage, data.service
        );

        // the config file is optional; a broken one is treated as absent
        let service_config = match load_service_config(
            self.resources.as_ref(),
            &data.project,
            &data.stage,
            &data.service,
        )
        .await
        {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                error!("could not load service config: {}", e);
                ServiceConfig::default()
            }
        };

        let credentials =
            resolve_credentials(self.secrets.as_ref(), &service_config.dt_creds, &data.project)
                .await?;
        info!("Dynatrace credentials (tenant, token) received");

        let custom_queries = load_custom_queries(
            self.resources.as_ref(),
            &data.project,
            &data.stage,
            &data.service,
        )
        .await?;

        let (start_ms, end_ms) = parse_time_window(&data.start, &data.end)?;

        let client = DynatraceClient::new(&credentials)?;
        let context = RequestContext::from_event(&data, envelope);
        let provider = SliProvider::new(Arc::new(client), self.secrets.clone(), context)
            .with_custom_queries(custom_queries);

        let mut labels = data.labels.clone();
        let prior_snapshot = load_dashboard_snapshot(
            self.resources.as_ref(),
            &data.project,
            &data.stage,
            &data.service,
        )
        .await;

        let indicator_values = match provider
            .query_dashboard_for_slis(
                &service_config.dashboard,
                prior_snapshot.as_deref(),
                start_ms,
                end_ms,
            )
            .await?
        {
            DashboardOutcome::NoDashboard => {
                fan_out_indicators(&provider, &data.indicators, start_ms, end_ms).await
            }
            DashboardOutcome::Unchanged { link } => {
                info!("dashboard unchanged since last run: reporting link only");
                labels.insert(DASHBOARD_LABEL.to_string(), link);
                Vec::new()
            }
            DashboardOutcome::Compiled(compilation) => {
                info!(
                    "dashboard compiled into {} indicator values",
                    compilation.results.len()
                );
                labels.insert(DASHBOARD_LABEL.to_string(), compilation.link);
                compilation.results
            }
        };

        info!("finished fetching metrics; sending event now");

        let finished = GetSliFinishedData {
            project: data.project,
            service: data.service,
            stage: data.stage,
            indicator_values,
            start: data.start,
            end: data.end,
            test_strategy: data.test_strategy,
            deployment_strategy: data.deployment_strategy,
            deployment: data.deployment,
            labels,
        };
        let event = EventEnvelope::finished(&envelope.correlation_id, &finished)?;
        self.sink.send(&event).await
    }
}

/// Queries every requested indicator, at most `MAX_PARALLEL_QUERIES` at a
/// time. Results come back in request order; a failing indicator contributes
/// a failure record instead of aborting the batch.
async fn fan_out_indicators(
    provider: &SliProvider,
    indicators: &[String],
    start_ms: i64,
    end_ms: i64,
) -> Vec<SliResult> {
    stream::iter(indicators.iter().cloned())
        .map(|indicator| async move {
            info!("fetching indicator: {}", indicator);
            match provider.get_sli_value(&indicator, start_ms, end_ms).await {
                Ok(value) => SliResult::ok(indicator, value),
                Err(e) => {
                    error!("indicator {} failed: {}", indicator, e);
                    SliResult::failed(indicator, e.to_string())
                }
            }
        })
        .buffered(MAX_PARALLEL_QUERIES)
        .collect()
        .await
}
