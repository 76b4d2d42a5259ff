//! Process configuration and the two per-service config files.
//!
//! Runtime knobs come from the environment (`EVENTBROKER`,
//! `CONFIGURATION_SERVICE`, `RCV_PORT`, `RCV_PATH`, `env`,
//! `HTTP_SSL_VERIFICATION`); per-service behavior comes from
//! `dynatrace/dynatrace.conf.yaml` and `dynatrace/sli.yaml` fetched through
//! the resource store.

pub mod resources;

pub use resources::{ConfigServiceStore, LocalFileStore, ResourceStore};

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DYNATRACE_CONFIG_FILENAME: &str = "dynatrace/dynatrace.conf.yaml";
pub const DYNATRACE_CONFIG_FILENAME_LOCAL: &str = "dynatrace/_dynatrace.conf.yaml";
pub const SLI_RESOURCE_URI: &str = "dynatrace/sli.yaml";
pub const DASHBOARD_RESOURCE_URI: &str = "dynatrace/dashboard.json";

/// Sentinel dashboard selector: locate the dashboard by naming convention.
pub const DASHBOARD_QUERY: &str = "query";

lazy_static! {
    /// `env=runlocal`: resources and credentials come from the local machine.
    pub static ref RUN_LOCAL: bool =
        std::env::var("env").map(|v| v == "runlocal").unwrap_or(false);
    /// `env=runlocaltest`: like runlocal, used by test drivers.
    pub static ref RUN_LOCAL_TEST: bool =
        std::env::var("env").map(|v| v == "runlocaltest").unwrap_or(false);
}

pub fn run_local() -> bool {
    *RUN_LOCAL || *RUN_LOCAL_TEST
}

/// TLS verification is on unless `HTTP_SSL_VERIFICATION=false` is set.
pub fn http_ssl_verification_enabled() -> bool {
    std::env::var("HTTP_SSL_VERIFICATION")
        .map(|v| v.to_lowercase() != "false")
        .unwrap_or(true)
}

/// Startup configuration read once from the process environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Port the event receiver listens on.
    pub port: u16,
    /// Path the event receiver listens on.
    pub path: String,
    /// Event broker endpoint for outbound events.
    pub eventbroker: Option<String>,
    /// Configuration service endpoint for resource lookups.
    pub configuration_service: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("RCV_PORT") {
            Ok(v) => v
                .parse::<u16>()
                .map_err(|_| anyhow!("RCV_PORT is not a valid port number: {}", v))?,
            Err(_) => 8080,
        };
        let path = std::env::var("RCV_PATH").unwrap_or_else(|_| "/".to_string());
        Ok(Self {
            port,
            path,
            eventbroker: service_endpoint("EVENTBROKER"),
            configuration_service: service_endpoint("CONFIGURATION_SERVICE"),
        })
    }
}

/// Reads an endpoint URL from an environment variable, defaulting the scheme
/// to `http` when none is given.
pub fn service_endpoint(var: &str) -> Option<String> {
    let raw = std::env::var(var).ok()?;
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Some(raw)
    } else {
        Some(format!("http://{}", raw))
    }
}

/// Parsed `dynatrace/dynatrace.conf.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub spec_version: String,
    /// Name of the secret holding the tenant credentials.
    #[serde(default, rename = "dtCreds")]
    pub dt_creds: String,
    /// Dashboard selector: a UUID, the literal `query`, or empty.
    #[serde(default)]
    pub dashboard: String,
}

impl ServiceConfig {
    pub fn parse(content: &str) -> Result<Self, crate::error::SliError> {
        serde_yaml::from_str(content)
            .map_err(|e| crate::error::SliError::parse_config(DYNATRACE_CONFIG_FILENAME, e))
    }
}

/// Parsed `dynatrace/sli.yaml`: logical indicator names mapped to queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliConfig {
    #[serde(default)]
    pub spec_version: String,
    #[serde(default)]
    pub indicators: HashMap<String, String>,
}

impl SliConfig {
    pub fn parse(content: &str) -> Result<Self, crate::error::SliError> {
        serde_yaml::from_str(content)
            .map_err(|e| crate::error::SliError::parse_config(SLI_RESOURCE_URI, e))
    }
}
