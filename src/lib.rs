//! Dynatrace SLI bridge
//!
//! Adapter between a workflow-orchestration platform and the Dynatrace API:
//! - resolves named SLIs into vendor metric / user-session queries
//! - compiles quality-gate dashboards into per-dimension indicators
//! - emits one result event per request, in request order

pub mod config;
pub mod credentials;
pub mod dynatrace;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod server;

// Re-exports for convenience
pub use dynatrace::{DynatraceClient, MetricsApi, SliProvider};
pub use error::SliError;
pub use orchestrator::SliEventHandler;
