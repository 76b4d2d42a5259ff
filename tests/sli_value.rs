//! Single-indicator retrieval against a mocked vendor API: built-in queries,
//! custom overrides, the MV2 and USQL encodings, and failure shapes.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use sli_bridge::dynatrace::{RequestContext, SliProvider};
use sli_bridge::error::SliError;
use support::*;

fn provider(api: Arc<MockMetricsApi>) -> SliProvider {
    provider_with_context(api, request_context())
}

fn provider_with_context(api: Arc<MockMetricsApi>, context: RequestContext) -> SliProvider {
    SliProvider::new(api, Arc::new(MockSecretStore::empty()), context)
}

fn queries(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const WINDOW_START: i64 = 1704067200000; // 2024-01-01T00:00:00Z
const WINDOW_END: i64 = 1704067500000; // 2024-01-01T00:05:00Z

#[tokio::test]
async fn builtin_throughput_compiles_the_expected_query() {
    let selector = "builtin:service.requestCount.total:merge(0):sum";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "builtin:service.requestCount.total",
        Canned::Ok(single_value_result(selector, 1250.0)),
    ));
    let provider = provider(api.clone());

    let value = provider
        .get_sli_value("throughput", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 1250.0);

    let urls = api.captured_metrics_urls();
    assert_eq!(urls.len(), 1);
    let url = &urls[0];
    assert!(url.contains("metricSelector=builtin:service.requestCount.total:merge(0):sum"));
    assert!(url.contains(
        "entitySelector=type(SERVICE),tag(keptn_project:sockshop),tag(keptn_stage:staging),tag(keptn_service:carts),tag(keptn_deployment:direct)"
    ));
    assert!(url.contains("resolution=Inf"));
    assert!(url.contains("from=1704067200000"));
    assert!(url.contains("to=1704067500000"));
}

#[tokio::test]
async fn legacy_scope_query_is_rewritten() {
    let selector = "builtin:service.response.time:merge(0):percentile(95)";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "builtin:service.response.time",
        Canned::Ok(single_value_result(selector, 240000.0)),
    ));
    let provider = provider(api.clone()).with_custom_queries(queries(&[(
        "response_time_p95",
        "builtin:service.response.time:merge(0):percentile(95)?scope=tag(foo)",
    )]));

    // response-time metrics scale microseconds to milliseconds
    let value = provider
        .get_sli_value("response_time_p95", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 240.0);

    let urls = api.captured_metrics_urls();
    assert!(urls[0].contains("entitySelector=tag(foo),type(SERVICE)"));
    assert!(urls[0].contains("metricSelector=builtin:service.response.time:merge(0):percentile(95)"));
}

#[tokio::test]
async fn mv2_prefix_scales_with_the_declared_unit() {
    let selector = "builtin:service.dbconnections.total:merge(0):avg";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "builtin:service.dbconnections.total",
        Canned::Ok(single_value_result(selector, 4200000.0)),
    ));
    let provider = provider(api).with_custom_queries(queries(&[(
        "db_time",
        "MV2;MicroSecond;metricSelector=builtin:service.dbconnections.total:merge(0):avg&entitySelector=type(SERVICE)",
    )]));

    let value = provider
        .get_sli_value("db_time", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 4200.0);
}

#[tokio::test]
async fn usql_table_query_picks_the_requested_dimension() {
    let api = Arc::new(MockMetricsApi::new().on_usql(
        "userSessionQueryLanguage/table",
        Canned::Ok(usql_table(vec![
            vec![text("Chrome"), number(1.0)],
            vec![text("Firefox"), number(2.5)],
        ])),
    ));
    let provider = provider(api.clone()).with_custom_queries(queries(&[(
        "browser_rt",
        "USQL;TABLE;Firefox;SELECT useragent,AVG(duration) FROM usersession GROUP BY useragent",
    )]));

    let value = provider
        .get_sli_value("browser_rt", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 2.5);

    let urls = api.usql_urls.lock().unwrap().clone();
    assert!(urls[0].contains("startTimestamp=1704067200000"));
    assert!(urls[0].contains("endTimestamp=1704067500000"));
    assert!(urls[0].contains("explain=false"));
}

#[tokio::test]
async fn usql_missing_dimension_is_an_error() {
    let api = Arc::new(MockMetricsApi::new().on_usql(
        "userSessionQueryLanguage/table",
        Canned::Ok(usql_table(vec![vec![text("Chrome"), number(1.0)]])),
    ));
    let provider = provider(api).with_custom_queries(queries(&[(
        "browser_rt",
        "USQL;TABLE;Safari;SELECT useragent,AVG(duration) FROM usersession",
    )]));

    let err = provider
        .get_sli_value("browser_rt", WINDOW_START, WINDOW_END)
        .await
        .unwrap_err();
    assert!(matches!(err, SliError::VendorEmpty(_)));
}

#[tokio::test]
async fn unknown_indicator_without_custom_entry_fails() {
    let provider = provider(Arc::new(MockMetricsApi::new()));
    let err = provider
        .get_sli_value("memory_usage", WINDOW_START, WINDOW_END)
        .await
        .unwrap_err();
    assert!(matches!(err, SliError::UnknownSli(name) if name == "memory_usage"));
}

#[tokio::test]
async fn custom_entry_overrides_builtin_default() {
    let selector = "calc:service.custom.throughput";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "calc:service.custom.throughput",
        Canned::Ok(single_value_result(selector, 7.0)),
    ));
    let provider = provider(api.clone()).with_custom_queries(queries(&[(
        "throughput",
        "metricSelector=calc:service.custom.throughput&entitySelector=type(SERVICE)",
    )]));

    let value = provider
        .get_sli_value("throughput", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 7.0);
    let urls = api.captured_metrics_urls();
    assert!(!urls[0].contains("builtin:service.requestCount.total"));
}

#[tokio::test]
async fn more_than_one_data_entry_is_rejected() {
    let selector = "builtin:service.requestCount.total:merge(0):sum";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "builtin:service.requestCount.total",
        Canned::Ok(dimensional_result(selector, &[(&[], &[1.0]), (&[], &[2.0])])),
    ));
    let provider = provider(api);

    let err = provider
        .get_sli_value("throughput", WINDOW_START, WINDOW_END)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expected 1"));
    assert!(message.contains(":merge(0):avg"));
}

#[tokio::test]
async fn vendor_http_error_carries_the_vendor_message() {
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "builtin:service.requestCount.total",
        Canned::Http {
            status: 403,
            message: "Token is missing required scope".to_string(),
        },
    ));
    let provider = provider(api);

    let err = provider
        .get_sli_value("throughput", WINDOW_START, WINDOW_END)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("403"));
    assert!(message.contains("Token is missing required scope"));
    // error text must never leak credentials
    assert!(!message.contains("mock-api-token"));
}

#[tokio::test]
async fn custom_filters_expand_into_the_query() {
    let mut context = request_context();
    context.custom_filters = vec![sli_bridge::events::SliFilter {
        key: "handler".into(),
        value: "\"ItemsController\"".into(),
    }];
    let selector =
        "builtin:service.requestCount.total:filter(eq(handler,ItemsController)):merge(0):sum";
    let api = Arc::new(MockMetricsApi::new().on_metrics(
        "filter(eq(handler,ItemsController))",
        Canned::Ok(single_value_result(selector, 10.0)),
    ));
    let provider = provider_with_context(api.clone(), context).with_custom_queries(queries(&[(
        "filtered",
        "metricSelector=builtin:service.requestCount.total:filter(eq(handler,$handler)):merge(0):sum&entitySelector=type(SERVICE)",
    )]));

    let value = provider
        .get_sli_value("filtered", WINDOW_START, WINDOW_END)
        .await
        .unwrap();
    assert_eq!(value, 10.0);
    let urls = api.captured_metrics_urls();
    assert!(urls[0].contains("filter(eq(handler,ItemsController))"));
    assert!(!urls[0].contains("$handler"));
}
