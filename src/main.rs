//! Dynatrace SLI bridge
//!
//! Receives `get-sli` events, resolves the requested indicators against the
//! Dynatrace API, and answers with a `get-sli.finished` event. In local mode
//! (`env=runlocal`) resources come from the working directory and results are
//! logged instead of emitted.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sli_bridge::config::{self, ConfigServiceStore, EnvConfig, LocalFileStore, ResourceStore};
use sli_bridge::credentials::{EnvSecretStore, MountedSecretStore, SecretStore};
use sli_bridge::events::{EventSink, HttpEventSink, LogEventSink};
use sli_bridge::orchestrator::SliEventHandler;
use sli_bridge::server::{run_server, AppState};

/// Where the platform mounts credential secrets in cluster mode.
const SECRETS_MOUNT_DIR: &str = "/var/run/secrets/sli-bridge";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let env = EnvConfig::from_env()?;

    let (secrets, resources, sink): (
        Arc<dyn SecretStore>,
        Arc<dyn ResourceStore>,
        Arc<dyn EventSink>,
    ) = if config::run_local() {
        info!("env=runlocal: using local filesystem to fetch resources");
        (
            Arc::new(EnvSecretStore),
            Arc::new(LocalFileStore::new(".")),
            Arc::new(LogEventSink),
        )
    } else {
        let configuration_service = env
            .configuration_service
            .clone()
            .ok_or_else(|| anyhow!("CONFIGURATION_SERVICE endpoint is not set"))?;
        let eventbroker = env
            .eventbroker
            .clone()
            .ok_or_else(|| anyhow!("EVENTBROKER endpoint is not set"))?;
        (
            Arc::new(MountedSecretStore::new(SECRETS_MOUNT_DIR)),
            Arc::new(ConfigServiceStore::new(configuration_service)),
            Arc::new(HttpEventSink::new(eventbroker)),
        )
    };

    let handler = Arc::new(SliEventHandler::new(secrets, resources, sink));
    run_server(AppState { handler }, env.port, &env.path).await
}
