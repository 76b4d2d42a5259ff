use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response envelope of `/api/v2/metrics/query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResult {
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub next_page_key: Option<String>,
    #[serde(default)]
    pub result: Vec<MetricSeries>,
}

/// One metric in a metrics-query response; `data` holds one entry per
/// dimension combination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    #[serde(default)]
    pub metric_id: String,
    #[serde(default)]
    pub data: Vec<MetricData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricData {
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub timestamps: Vec<i64>,
    #[serde(default)]
    pub values: Vec<f64>,
}

/// Response envelope of the user-session query endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsqlResult {
    #[serde(default)]
    pub extrapolation_level: i32,
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<UsqlCell>>,
}

/// USQL row cells are duck-typed: strings for dimensions, numbers for
/// values. Decoded lazily per tile type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UsqlCell {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl UsqlCell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            UsqlCell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UsqlCell::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Entry of the `/api/config/v1/dashboards` listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardStub {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardList {
    #[serde(default)]
    pub dashboards: Vec<DashboardStub>,
}

/// The subset of a dashboard definition the compiler consumes. Deeply nested
/// with optional sub-objects; modeled as plain records, not normalized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub dashboard_metadata: DashboardMetadata,
    #[serde(default)]
    pub tiles: Vec<Tile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_filter: Option<DashboardFilter>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardFilter {
    #[serde(default)]
    pub timeframe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_zone: Option<ManagementZone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementZone {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tile_type: String,
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub markdown: String,
    /// Raw USQL text for `DTAQL` tiles.
    #[serde(default)]
    pub query: String,
    /// Result interpretation for `DTAQL` tiles: SINGLE_VALUE, PIE_CHART,
    /// COLUMN_CHART or TABLE.
    #[serde(default, rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub tile_filter: TileFilter,
    #[serde(default)]
    pub assigned_entities: Vec<String>,
    #[serde(default)]
    pub filter_config: FilterConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileFilter {
    #[serde(default)]
    pub timeframe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_zone: Option<ManagementZone>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, rename = "type")]
    pub filter_type: String,
    #[serde(default)]
    pub custom_name: String,
    #[serde(default)]
    pub default_name: String,
    #[serde(default)]
    pub chart_config: ChartConfig,
    /// entityType -> filter kind (SPECIFIC_ENTITIES, AUTO_TAGS, ...) -> values
    #[serde(default)]
    pub filters_per_entity_type: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub legend_shown: bool,
    #[serde(default, rename = "type")]
    pub chart_type: String,
    #[serde(default)]
    pub series: Vec<ChartSeries>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries {
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub aggregation: String,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub dimensions: Vec<SeriesDimension>,
    #[serde(default)]
    pub sort_ascending: bool,
    #[serde(default)]
    pub sort_column: bool,
    #[serde(default)]
    pub aggregation_rate: String,
}

/// A dimension the chart splits by. `id` is the index into the metric's
/// dimension definitions; `values` is an optional fixed filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesDimension {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub entity_dimension: bool,
}

/// Response of `/api/v2/metrics/<metricId>`; drives the dimension-merge
/// computation and unit scaling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    #[serde(default)]
    pub metric_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub aggregation_types: Vec<String>,
    #[serde(default)]
    pub default_aggregation: DefaultAggregation,
    #[serde(default)]
    pub dimension_definitions: Vec<DimensionDefinition>,
    #[serde(default)]
    pub entity_type: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultAggregation {
    #[serde(default, rename = "type")]
    pub aggregation_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub dimension_type: String,
}

/// Vendor error envelope returned on non-200 responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorEnvelope {
    #[serde(default)]
    pub error: ApiError,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usql_cells_decode_heterogeneous_rows() {
        let raw = serde_json::json!({
            "extrapolationLevel": 1,
            "columnNames": ["useragent", "avg(duration)"],
            "values": [["Chrome", 1.0], ["Firefox", 2.5], [null, 3.0]]
        });
        let result: UsqlResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.values[0][0].as_str(), Some("Chrome"));
        assert_eq!(result.values[1][1].as_f64(), Some(2.5));
        assert_eq!(result.values[2][0], UsqlCell::Null);
    }

    #[test]
    fn test_dashboard_decodes_partial_json() {
        let raw = serde_json::json!({
            "id": "dd4b1627-8f4e-4c41-9f09-d77e0b0db64e",
            "dashboardMetadata": {
                "name": "KQG;project=sockshop;service=carts;stage=staging",
                "dashboardFilter": {"managementZone": {"id": "12345", "name": "prod"}}
            },
            "tiles": [{
                "name": "Custom chart",
                "tileType": "CUSTOM_CHARTING",
                "filterConfig": {
                    "customName": "Response time;sli=rt;pass=<500",
                    "chartConfig": {
                        "series": [{
                            "metric": "builtin:service.response.time",
                            "aggregation": "AVG",
                            "entityType": "SERVICE",
                            "dimensions": []
                        }]
                    }
                }
            }]
        });
        let dashboard: Dashboard = serde_json::from_value(raw).unwrap();
        let zone = dashboard
            .dashboard_metadata
            .dashboard_filter
            .as_ref()
            .and_then(|f| f.management_zone.as_ref())
            .unwrap();
        assert_eq!(zone.id, "12345");
        let series = &dashboard.tiles[0].filter_config.chart_config.series[0];
        assert_eq!(series.metric, "builtin:service.response.time");
        assert!(series.percentile.is_none());
    }
}
