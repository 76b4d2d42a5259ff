//! Resource store port: fetches per-service config files with
//! service → stage → project scope fallback.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use super::{
    ServiceConfig, SliConfig, DASHBOARD_RESOURCE_URI, DYNATRACE_CONFIG_FILENAME,
    DYNATRACE_CONFIG_FILENAME_LOCAL, SLI_RESOURCE_URI,
};
use crate::error::SliError;

/// Read access to the configuration store. `Ok(None)` means the resource does
/// not exist at that scope; errors are reserved for transport failures.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn service_resource(
        &self,
        project: &str,
        stage: &str,
        service: &str,
        path: &str,
    ) -> Result<Option<String>, SliError>;

    async fn stage_resource(
        &self,
        project: &str,
        stage: &str,
        path: &str,
    ) -> Result<Option<String>, SliError>;

    async fn project_resource(&self, project: &str, path: &str)
        -> Result<Option<String>, SliError>;
}

/// Fetches `path`, trying the narrowest scope first. The first non-empty
/// content wins; a miss at every scope is `None`, not an error.
pub async fn scoped_resource(
    store: &dyn ResourceStore,
    project: &str,
    stage: &str,
    service: &str,
    path: &str,
) -> Result<Option<String>, SliError> {
    if let Some(content) = store.service_resource(project, stage, service, path).await? {
        if !content.is_empty() {
            debug!("found {} on service level", path);
            return Ok(Some(content));
        }
    }
    if let Some(content) = store.stage_resource(project, stage, path).await? {
        if !content.is_empty() {
            debug!("found {} on stage level", path);
            return Ok(Some(content));
        }
    }
    if let Some(content) = store.project_resource(project, path).await? {
        if !content.is_empty() {
            debug!("found {} on project level", path);
            return Ok(Some(content));
        }
    }
    debug!("no {} found for {}/{}/{}", path, project, stage, service);
    Ok(None)
}

pub async fn load_service_config(
    store: &dyn ResourceStore,
    project: &str,
    stage: &str,
    service: &str,
) -> Result<Option<ServiceConfig>, SliError> {
    match scoped_resource(store, project, stage, service, DYNATRACE_CONFIG_FILENAME).await? {
        Some(content) => Ok(Some(ServiceConfig::parse(&content)?)),
        None => Ok(None),
    }
}

pub async fn load_custom_queries(
    store: &dyn ResourceStore,
    project: &str,
    stage: &str,
    service: &str,
) -> Result<HashMap<String, String>, SliError> {
    match scoped_resource(store, project, stage, service, SLI_RESOURCE_URI).await? {
        Some(content) => Ok(SliConfig::parse(&content)?.indicators),
        None => Ok(HashMap::new()),
    }
}

/// The dashboard snapshot persisted by consumers after the previous run, used
/// for change detection. Missing or unreadable snapshots count as absent.
pub async fn load_dashboard_snapshot(
    store: &dyn ResourceStore,
    project: &str,
    stage: &str,
    service: &str,
) -> Option<String> {
    scoped_resource(store, project, stage, service, DASHBOARD_RESOURCE_URI)
        .await
        .ok()
        .flatten()
}

#[derive(Deserialize)]
struct ResourceBody {
    #[serde(rename = "resourceContent", default)]
    resource_content: String,
}

/// HTTP implementation backed by the configuration service. Resource content
/// comes back base64-encoded inside a small JSON body.
pub struct ConfigServiceStore {
    client: reqwest::Client,
    endpoint: String,
}

impl ConfigServiceStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn fetch(&self, url: String) -> Result<Option<String>, SliError> {
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SliError::VendorHttp {
                status: response.status().as_u16(),
                message: format!("configuration service rejected {}", url),
            });
        }
        let body: ResourceBody = response
            .json()
            .await
            .map_err(|e| SliError::ParseResponse(e.to_string()))?;
        if body.resource_content.is_empty() {
            return Ok(None);
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&body.resource_content)
            .map_err(|e| SliError::ParseResponse(e.to_string()))?;
        Ok(Some(String::from_utf8_lossy(&decoded).into_owned()))
    }
}

#[async_trait]
impl ResourceStore for ConfigServiceStore {
    async fn service_resource(
        &self,
        project: &str,
        stage: &str,
        service: &str,
        path: &str,
    ) -> Result<Option<String>, SliError> {
        self.fetch(format!(
            "{}/v1/project/{}/stage/{}/service/{}/resource/{}",
            self.endpoint,
            project,
            stage,
            service,
            urlencoding::encode(path)
        ))
        .await
    }

    async fn stage_resource(
        &self,
        project: &str,
        stage: &str,
        path: &str,
    ) -> Result<Option<String>, SliError> {
        self.fetch(format!(
            "{}/v1/project/{}/stage/{}/resource/{}",
            self.endpoint,
            project,
            stage,
            urlencoding::encode(path)
        ))
        .await
    }

    async fn project_resource(
        &self,
        project: &str,
        path: &str,
    ) -> Result<Option<String>, SliError> {
        self.fetch(format!(
            "{}/v1/project/{}/resource/{}",
            self.endpoint,
            project,
            urlencoding::encode(path)
        ))
        .await
    }
}

/// Local-mode implementation reading from the working directory. Only the
/// service scope resolves; the config file maps to its underscore-prefixed
/// local variant.
pub struct LocalFileStore {
    base_dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn local_path(&self, path: &str) -> PathBuf {
        if path == DYNATRACE_CONFIG_FILENAME {
            self.base_dir.join(DYNATRACE_CONFIG_FILENAME_LOCAL)
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl ResourceStore for LocalFileStore {
    async fn service_resource(
        &self,
        _project: &str,
        _stage: &str,
        _service: &str,
        path: &str,
    ) -> Result<Option<String>, SliError> {
        match tokio::fs::read_to_string(self.local_path(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(_) => Ok(None),
        }
    }

    async fn stage_resource(
        &self,
        _project: &str,
        _stage: &str,
        _path: &str,
    ) -> Result<Option<String>, SliError> {
        Ok(None)
    }

    async fn project_resource(
        &self,
        _project: &str,
        _path: &str,
    ) -> Result<Option<String>, SliError> {
        Ok(None)
    }
}
