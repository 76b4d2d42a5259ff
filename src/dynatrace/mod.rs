//! Dynatrace integration: query compilation, the API client, and the
//! dashboard-to-SLI compiler.

pub mod client;
pub mod dashboard;
pub mod query;
pub mod sli;
pub mod title;
pub mod types;
pub mod units;

pub use client::{DynatraceClient, MetricsApi};
pub use dashboard::{DashboardCompilation, DashboardOutcome};
pub use query::{parse_time_window, RequestContext};

use std::collections::HashMap;
use std::sync::Arc;

use crate::credentials::SecretStore;

/// Per-request facade over the vendor API: resolves indicator queries,
/// retrieves values, and compiles dashboards. Holds no mutable state and is
/// rebuilt for every request.
pub struct SliProvider {
    pub(crate) api: Arc<dyn MetricsApi>,
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) context: RequestContext,
    pub(crate) custom_queries: HashMap<String, String>,
}

impl SliProvider {
    pub fn new(
        api: Arc<dyn MetricsApi>,
        secrets: Arc<dyn SecretStore>,
        context: RequestContext,
    ) -> Self {
        Self {
            api,
            secrets,
            context,
            custom_queries: HashMap::new(),
        }
    }

    /// Installs the custom indicator queries loaded from `sli.yaml`.
    pub fn with_custom_queries(mut self, custom_queries: HashMap<String, String>) -> Self {
        self.custom_queries = custom_queries;
        self
    }
}
