//! Tenant credential resolution.
//!
//! Credentials live in named secrets. Resolution walks a fixed waterfall:
//! the secret named in the service config, then the per-project secret, then
//! the two global fallbacks. In local mode they come straight from the
//! process environment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config;
use crate::error::SliError;

pub const TENANT_KEY: &str = "DT_TENANT";
pub const API_TOKEN_KEY: &str = "DT_API_TOKEN";
pub const PAAS_TOKEN_KEY: &str = "DT_PAAS_TOKEN";

/// A resolved credential triple. `tenant` always carries an explicit scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtCredentials {
    #[serde(rename = "DT_TENANT")]
    pub tenant: String,
    #[serde(rename = "DT_API_TOKEN")]
    pub api_token: String,
    #[serde(rename = "DT_PAAS_TOKEN")]
    pub paas_token: String,
}

/// Read access to named secrets. `Ok(None)` means the secret does not exist.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, SliError>;
}

/// Prepends `https://` when the tenant URL has no scheme.
fn normalize_tenant(tenant: &str) -> String {
    if tenant.starts_with("https://") || tenant.starts_with("http://") {
        tenant.to_string()
    } else {
        format!("https://{}", tenant)
    }
}

fn credentials_from_secret(secret: &HashMap<String, String>) -> Option<DtCredentials> {
    let tenant = secret.get(TENANT_KEY)?.clone();
    let api_token = secret.get(API_TOKEN_KEY)?.clone();
    let paas_token = secret.get(PAAS_TOKEN_KEY)?.clone();
    if tenant.is_empty() || api_token.is_empty() || paas_token.is_empty() {
        return None;
    }
    Some(DtCredentials {
        tenant: normalize_tenant(&tenant),
        api_token,
        paas_token,
    })
}

/// Resolves credentials for a project. `config_secret_name` is the optional
/// secret named in `dynatrace.conf.yaml`; an empty name is skipped. The first
/// secret yielding a complete triple wins.
pub async fn resolve_credentials(
    store: &dyn SecretStore,
    config_secret_name: &str,
    project: &str,
) -> Result<DtCredentials, SliError> {
    if config::run_local() {
        return credentials_from_env();
    }

    let candidates = [
        config_secret_name.to_string(),
        format!("dynatrace-credentials-{}", project),
        "dynatrace-credentials".to_string(),
        "dynatrace".to_string(),
    ];

    for name in candidates.iter().filter(|n| !n.is_empty()) {
        debug!("trying to fetch credential secret '{}'", name);
        match store.fetch_secret(name).await {
            Ok(Some(secret)) => {
                if let Some(credentials) = credentials_from_secret(&secret) {
                    debug!("credentials found in secret '{}'", name);
                    return Ok(credentials);
                }
                warn!("secret '{}' exists but is missing credential keys", name);
            }
            Ok(None) => {}
            Err(e) => warn!("error fetching secret '{}': {}", name, e),
        }
    }

    Err(SliError::NoCredentials)
}

/// Local-mode credentials from `DT_TENANT`/`DT_API_TOKEN`/`DT_PAAS_TOKEN`.
/// The PaaS token may be empty here.
fn credentials_from_env() -> Result<DtCredentials, SliError> {
    let tenant = std::env::var(TENANT_KEY).unwrap_or_default();
    let api_token = std::env::var(API_TOKEN_KEY).unwrap_or_default();
    if tenant.is_empty() || api_token.is_empty() {
        return Err(SliError::NoCredentials);
    }
    Ok(DtCredentials {
        tenant: normalize_tenant(&tenant),
        api_token,
        paas_token: std::env::var(PAAS_TOKEN_KEY).unwrap_or_default(),
    })
}

/// Secret store backed by a mounted secrets directory: each secret is a
/// directory of key files, the usual Kubernetes volume layout.
pub struct MountedSecretStore {
    base_dir: PathBuf,
}

impl MountedSecretStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl SecretStore for MountedSecretStore {
    async fn fetch_secret(&self, name: &str) -> Result<Option<HashMap<String, String>>, SliError> {
        let dir = self.base_dir.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };
        let mut secret = HashMap::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let key = match path.file_name().and_then(|n| n.to_str()) {
                Some(key) => key.to_string(),
                None => continue,
            };
            if let Ok(value) = tokio::fs::read_to_string(&path).await {
                secret.insert(key, value.trim_end_matches('\n').to_string());
            }
        }
        if secret.is_empty() {
            Ok(None)
        } else {
            Ok(Some(secret))
        }
    }
}

/// Secret store backed by environment variables, for local runs. Looks up
/// keys directly, ignoring the secret name.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn fetch_secret(&self, _name: &str) -> Result<Option<HashMap<String, String>>, SliError> {
        let mut secret = HashMap::new();
        for key in [TENANT_KEY, API_TOKEN_KEY, PAAS_TOKEN_KEY] {
            if let Ok(value) = std::env::var(key) {
                secret.insert(key.to_string(), value);
            }
        }
        if secret.is_empty() {
            Ok(None)
        } else {
            Ok(Some(secret))
        }
    }
}
