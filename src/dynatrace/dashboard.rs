//! Dashboard location and the dashboard-to-SLI compiler.
//!
//! A dashboard opts into compilation through its title (`KQG;project=...`)
//! or by being named directly in the service config. Each qualifying tile is
//! turned into vendor queries; every dimension value in the response becomes
//! its own indicator. Alongside the values the compiler synthesizes the
//! SLIConfig and SLO set consumers persist for later runs.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::query::{build_metrics_query, build_usql_query, is_matching_metric_id};
use super::sli::{clean_indicator_name, usql_row_value};
use super::title::{parse_markdown_configuration, parse_tile_title, TileParams};
use super::types::{Dashboard, Tile};
use super::units::scale_value;
use super::SliProvider;
use crate::config::{SliConfig, DASHBOARD_QUERY};
use crate::error::SliError;
use crate::events::{ServiceLevelObjectives, SliResult, SloDefinition};

/// Marker a dashboard must carry to opt into change detection. Without it
/// every run recompiles the dashboard.
const PARSE_ON_CHANGE_MARKER: &str = "KQG.QueryBehavior=ParseOnChange";

lazy_static! {
    static ref UUID_PATTERN: Regex = Regex::new(
        "(?i)^[a-f0-9]{8}-[a-f0-9]{4}-4[a-f0-9]{3}-[89ab][a-f0-9]{3}-[a-f0-9]{12}$"
    )
    .unwrap();
}

pub fn is_valid_uuid(value: &str) -> bool {
    UUID_PATTERN.is_match(value)
}

/// What a dashboard run produced.
#[derive(Debug)]
pub enum DashboardOutcome {
    /// No dashboard configured or located; fall back to per-indicator queries.
    NoDashboard,
    /// Dashboard carries the ParseOnChange marker and is identical to the
    /// persisted snapshot; only the deep link is reported.
    Unchanged { link: String },
    Compiled(Box<DashboardCompilation>),
}

/// Everything compiled out of one dashboard pass.
#[derive(Debug)]
pub struct DashboardCompilation {
    /// Deep link into the dashboard for the evaluated timeframe.
    pub link: String,
    /// Pretty-printed definition, for consumers to persist as the next
    /// change-detection snapshot.
    pub dashboard_json: String,
    pub sli_config: SliConfig,
    pub objectives: ServiceLevelObjectives,
    pub results: Vec<SliResult>,
}

/// True when the definition must be (re)compiled.
fn has_dashboard_changed(dashboard_json: &str, existing_snapshot: Option<&str>) -> bool {
    if !dashboard_json.contains(PARSE_ON_CHANGE_MARKER) {
        return true;
    }
    match existing_snapshot {
        Some(existing) => existing != dashboard_json,
        None => true,
    }
}

/// Builds the `,entityId("...")`/`,tag("...")` entity-selector suffix from a
/// tile's per-entity-type filters.
fn entity_selector_from_filters(
    filters_per_entity_type: &HashMap<String, HashMap<String, Vec<String>>>,
    entity_type: &str,
) -> String {
    let mut selector = String::new();
    if let Some(filters) = filters_per_entity_type.get(entity_type) {
        if let Some(entities) = filters.get("SPECIFIC_ENTITIES") {
            for entity_id in entities {
                selector.push_str(&format!(",entityId(\"{}\")", entity_id));
            }
        }
        if let Some(tags) = filters.get("AUTO_TAGS") {
            for tag in tags {
                selector.push_str(&format!(",tag(\"{}\")", tag));
            }
        }
    }
    selector
}

impl SliProvider {
    /// Scans the dashboard list for one following the naming convention:
    /// title starts with `kqg;` and its `;`-separated fragments contain
    /// `project=`, `service=` and `stage=` entries for this request.
    async fn find_dashboard(&self) -> Result<Option<String>, SliError> {
        let list = self.api.list_dashboards().await?;

        let wanted = [
            format!("project={}", self.context.project).to_lowercase(),
            format!("service={}", self.context.service).to_lowercase(),
            format!("stage={}", self.context.stage).to_lowercase(),
        ];

        for dashboard in &list.dashboards {
            if !dashboard.name.to_lowercase().starts_with("kqg;") {
                continue;
            }
            let fragments: Vec<String> = dashboard
                .name
                .split(';')
                .map(|fragment| fragment.to_lowercase())
                .collect();
            if wanted.iter().all(|want| fragments.iter().any(|f| f == want)) {
                return Ok(Some(dashboard.id.clone()));
            }
        }
        Ok(None)
    }

    /// Resolves the dashboard selector: `query` triggers the naming-convention
    /// lookup, empty means no dashboard, anything else must be a UUID.
    async fn load_dashboard(&self, selector: &str) -> Result<Option<(Dashboard, String)>, SliError> {
        let mut selector = selector.to_string();

        if selector == DASHBOARD_QUERY {
            selector = match self.find_dashboard().await {
                Ok(Some(id)) => {
                    debug!(
                        "dashboard query for {}.{}.{} found dashboard={}",
                        self.context.project, self.context.stage, self.context.service, id
                    );
                    id
                }
                Ok(None) => {
                    debug!(
                        "dashboard option query, but no KQG dashboard found for {}.{}.{}",
                        self.context.project, self.context.stage, self.context.service
                    );
                    String::new()
                }
                Err(e) => {
                    warn!("dashboard lookup failed: {}", e);
                    String::new()
                }
            };
        }

        if selector.is_empty() {
            return Ok(None);
        }
        if !is_valid_uuid(&selector) {
            return Err(SliError::BadDashboardId(selector));
        }

        debug!("querying dashboard with id {}", selector);
        let dashboard = self.api.get_dashboard(&selector).await?;
        Ok(Some((dashboard, selector)))
    }

    /// Runs the full dashboard flow for one request: locate, change-check,
    /// compile tiles into indicator values plus the synthesized SLI/SLO set.
    pub async fn query_dashboard_for_slis(
        &self,
        selector: &str,
        prior_snapshot: Option<&str>,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<DashboardOutcome, SliError> {
        let mut selector = selector.to_string();

        // a persisted dashboard.json with no explicit selector means earlier
        // runs used the query behavior; keep doing so
        if selector.is_empty() && prior_snapshot.map_or(false, |s| !s.is_empty()) {
            debug!("empty dashboard selector but dashboard.json present: defaulting to query");
            selector = DASHBOARD_QUERY.to_string();
        }

        let (dashboard, dashboard_id) = match self.load_dashboard(&selector).await? {
            Some(found) => found,
            None => return Ok(DashboardOutcome::NoDashboard),
        };

        let management_zone = dashboard
            .dashboard_metadata
            .dashboard_filter
            .as_ref()
            .and_then(|filter| filter.management_zone.as_ref());
        let (dashboard_mz_filter, link_mz_suffix) = match management_zone {
            Some(zone) => (format!(",mzId({})", zone.id), format!(";gf={}", zone.id)),
            None => (String::new(), String::new()),
        };

        let link_id = if dashboard.id.is_empty() {
            dashboard_id.as_str()
        } else {
            dashboard.id.as_str()
        };
        let link = format!(
            "{}#dashboard;id={};gtf=c_{}_{}{}",
            self.api.api_url(),
            link_id,
            start_ms,
            end_ms,
            link_mz_suffix
        );

        let dashboard_json = serde_json::to_string_pretty(&dashboard)
            .map_err(|e| SliError::ParseResponse(e.to_string()))?;
        if !has_dashboard_changed(&dashboard_json, prior_snapshot) {
            debug!("dashboard has not changed: skipping tile compilation");
            return Ok(DashboardOutcome::Unchanged { link });
        }
        debug!("dashboard changed (or opted out of change detection): compiling tiles");

        let mut compilation = DashboardCompilation {
            link,
            dashboard_json,
            sli_config: SliConfig {
                spec_version: "0.1.4".to_string(),
                indicators: HashMap::new(),
            },
            objectives: ServiceLevelObjectives::default(),
            results: Vec::new(),
        };

        for tile in &dashboard.tiles {
            match tile.tile_type.as_str() {
                "SYNTHETIC_TESTS" => continue,
                "MARKDOWN" => {
                    if tile.markdown.contains("KQG.") {
                        parse_markdown_configuration(&tile.markdown, &mut compilation.objectives);
                    }
                    continue;
                }
                _ => {}
            }

            // custom charts and USQL tiles name themselves differently
            let title = if tile.filter_config.custom_name.is_empty() {
                tile.custom_name.clone()
            } else {
                tile.filter_config.custom_name.clone()
            };

            let params = parse_tile_title(&title, &[], &[]);
            if params.sli_name.is_empty() {
                debug!("tile '{}' not included: title carries no sli=<name>", title);
                continue;
            }

            // tile-level management zone overrides the dashboard-level one
            let mz_filter = match tile.tile_filter.management_zone.as_ref() {
                Some(zone) => format!(",mzId({})", zone.id),
                None => dashboard_mz_filter.clone(),
            };

            match tile.tile_type.as_str() {
                "CUSTOM_CHARTING" => {
                    self.compile_charting_tile(tile, &params, &mz_filter, start_ms, end_ms, &mut compilation)
                        .await
                }
                "DTAQL" => {
                    self.compile_usql_tile(tile, &params, start_ms, end_ms, &mut compilation)
                        .await
                }
                _ => {}
            }
        }

        Ok(DashboardOutcome::Compiled(Box::new(compilation)))
    }

    /// Compiles one `CUSTOM_CHARTING` tile: per series, derive the metric
    /// query from the chart configuration, run it, and fan the response out
    /// into one indicator per dimension value.
    async fn compile_charting_tile(
        &self,
        tile: &Tile,
        params: &TileParams,
        mz_filter: &str,
        start_ms: i64,
        end_ms: i64,
        out: &mut DashboardCompilation,
    ) {
        debug!("processing custom chart tile, sli={}", params.sli_name);

        for series in &tile.filter_config.chart_config.series {
            // dimension definitions and the default aggregation come from the
            // metric's own description
            let metric_definition = match self.api.describe_metric(&series.metric).await {
                Ok(definition) => definition,
                Err(e) => {
                    debug!("error retrieving metric description for {}: {}", series.metric, e);
                    continue;
                }
            };

            let mut merge_aggregator = String::new();
            let mut filter_aggregator = String::new();
            let mut filter_sli_template = String::new();
            let mut entity_selector_template = String::new();

            // merge every metric dimension the chart does not split by;
            // merges execute in sequence, so walk indexes high to low
            for metric_dim_ix in (0..metric_definition.dimension_definitions.len()).rev() {
                let metric_dim_id = metric_dim_ix.to_string();
                let mut merge_dimension = true;

                for series_dim in &series.dimensions {
                    if series_dim.id != metric_dim_id {
                        continue;
                    }
                    merge_dimension = false;

                    if let Some(first_value) = series_dim.values.first() {
                        // only the first configured value is applied; multi-value
                        // dimension filters are a known limitation
                        filter_aggregator =
                            format!(":filter(eq({},{}))", series_dim.name, first_value);
                    } else if series_dim.name.starts_with("dt.entity.") {
                        entity_selector_template = ",entityId(FILTERDIMENSIONVALUE)".to_string();
                    } else {
                        filter_sli_template =
                            format!(":filter(eq({},FILTERDIMENSIONVALUE))", series_dim.name);
                    }
                }

                if merge_dimension {
                    debug!(
                        "merging dimension {}",
                        metric_definition
                            .dimension_definitions
                            .get(metric_dim_ix)
                            .map(|d| d.name.as_str())
                            .unwrap_or_default()
                    );
                    merge_aggregator.push_str(&format!(":merge({})", metric_dim_ix));
                }
            }

            let mut aggregation = metric_definition.default_aggregation.aggregation_type.clone();
            if series.aggregation != "NONE" && !series.aggregation.is_empty() {
                aggregation = series.aggregation.clone();
            }
            if aggregation == "PERCENTILE" {
                aggregation = format!("percentile({})", series.percentile.unwrap_or(0.0));
            }
            // the ratio chart options have no API equivalent; average is the
            // closest the metrics API offers
            if aggregation == "OF_INTEREST_RATIO" || aggregation == "OTHER_RATIO" {
                aggregation = "avg".to_string();
            }

            // the chart's entity type can be stale; the metric definition wins
            let entity_type = metric_definition
                .entity_type
                .first()
                .cloned()
                .unwrap_or_else(|| series.entity_type.clone());

            let entity_tile_filter =
                entity_selector_from_filters(&tile.filter_config.filters_per_entity_type, &entity_type);

            // :names makes the response carry dimension names next to ids
            let metric_query = format!(
                "metricSelector={}{}{}:{}:names&entitySelector=type({}){}{}",
                series.metric,
                merge_aggregator,
                filter_aggregator,
                aggregation.to_lowercase(),
                entity_type,
                entity_tile_filter,
                mz_filter
            );

            let (url, metric_selector) = build_metrics_query(
                self.api.api_url(),
                &metric_query,
                start_ms,
                end_ms,
                &self.context,
                self.secrets.as_ref(),
            )
            .await;

            let query_result = match self.api.query_metrics(&url).await {
                Ok(result) => result,
                Err(e) => {
                    debug!("no result for query: {}", e);
                    out.results.push(SliResult::failed(&params.sli_name, e.to_string()));
                    out.sli_config
                        .indicators
                        .insert(params.sli_name.clone(), metric_query.clone());
                    continue;
                }
            };

            for series_result in &query_result.result {
                if !is_matching_metric_id(&series_result.metric_id, &metric_selector) {
                    debug!(
                        "retrieved unintended metric {} while expecting {}",
                        series_result.metric_id, metric_selector
                    );
                    continue;
                }

                let data_count = series_result.data.len();
                if data_count == 0 {
                    debug!("no data for metric {}", series_result.metric_id);
                }

                for entry in &series_result.data {
                    let mut indicator_name = params.sli_name.clone();
                    let mut metric_query_for_sli = metric_query.clone();
                    // splice point in the stored query for the per-dimension filter
                    let mut filter_sli_value = ":names".to_string();

                    // a single data entry keeps the plain base name; only
                    // multi-dimension responses get per-value indicators
                    if data_count > 1 {
                        let dimension_count = entry.dimensions.len();
                        // :names doubles the dimension list into name/id pairs;
                        // anything else means we only received ids
                        let dimension_increment = if dimension_count != series.dimensions.len() * 2 {
                            debug!("no name/id dimension pairs received, assuming ids only");
                            1
                        } else {
                            2
                        };

                        let mut dim_ix = 0;
                        while dim_ix < dimension_count {
                            let dimension_name = &entry.dimensions[dim_ix];
                            indicator_name = format!("{}_{}", indicator_name, dimension_name);
                            filter_sli_value = format!(
                                ":names{}",
                                filter_sli_template.replacen("FILTERDIMENSIONVALUE", dimension_name, 1)
                            );
                            if !entity_selector_template.is_empty() && dimension_increment == 2 {
                                let dimension_entity_id = &entry.dimensions[dim_ix + 1];
                                metric_query_for_sli.push_str(&entity_selector_template.replacen(
                                    "FILTERDIMENSIONVALUE",
                                    dimension_entity_id,
                                    1,
                                ));
                            }
                            dim_ix += dimension_increment;
                        }
                    }

                    let indicator_name = clean_indicator_name(&indicator_name);

                    let value = if entry.values.is_empty() {
                        0.0
                    } else {
                        entry.values.iter().sum::<f64>() / entry.values.len() as f64
                    };
                    let value =
                        scale_value(&metric_definition.metric_id, &metric_definition.unit, value);
                    debug!("{}: {:.2}", indicator_name, value);

                    out.results.push(SliResult::ok(&indicator_name, value));
                    // the unit prefix lets later single-value runs scale correctly
                    out.sli_config.indicators.insert(
                        indicator_name.clone(),
                        format!(
                            "MV2;{};{}",
                            metric_definition.unit,
                            metric_query_for_sli.replacen(":names", &filter_sli_value, 1)
                        ),
                    );
                    out.objectives.objectives.push(SloDefinition {
                        sli: indicator_name,
                        pass: params.pass.clone(),
                        warning: params.warning.clone(),
                        weight: params.weight,
                        key_sli: params.key_sli,
                    });
                }
            }
        }
    }

    /// Compiles one `DTAQL` tile: run the user-session query and interpret
    /// each row according to the tile's visualization type.
    async fn compile_usql_tile(
        &self,
        tile: &Tile,
        params: &TileParams,
        start_ms: i64,
        end_ms: i64,
        out: &mut DashboardCompilation,
    ) {
        debug!("processing USQL tile, sli={}", params.sli_name);

        let url = build_usql_query(
            self.api.api_url(),
            &tile.query,
            start_ms,
            end_ms,
            &self.context,
            self.secrets.as_ref(),
        )
        .await;

        let result = match self.api.query_usql(&url).await {
            Ok(result) => result,
            Err(e) => {
                warn!("USQL query for tile '{}' failed: {}", params.sli_name, e);
                return;
            }
        };

        for row in &result.values {
            let (dimension, value) = match usql_row_value(&tile.chart_type, row) {
                Some(entry) => entry,
                None => {
                    debug!("USQL tile type {} not supported for this row", tile.chart_type);
                    continue;
                }
            };

            let indicator_name = if dimension.is_empty() {
                params.sli_name.clone()
            } else {
                format!("{}_{}", params.sli_name, dimension)
            };
            let indicator_name = clean_indicator_name(&indicator_name);
            debug!("{}: {:.2}", indicator_name, value);

            out.results.push(SliResult::ok(&indicator_name, value));
            out.sli_config.indicators.insert(
                indicator_name.clone(),
                format!("USQL;{};{};{}", tile.chart_type, dimension, tile.query),
            );
            out.objectives.objectives.push(SloDefinition {
                sli: indicator_name,
                pass: params.pass.clone(),
                warning: params.warning.clone(),
                weight: params.weight,
                key_sli: params.key_sli,
            });
        }
    }
}
