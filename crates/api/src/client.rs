//! HTTP client for the Databricks Clusters API.

use std::sync::Arc;

use async_trait::async_trait;
use dcluster_core::{ClusterSpec, ExternalId, StatusSnapshot};
use dcluster_reconciler::{ApiResult, ClusterApi, IdempotencyKey};
use reqwest::Method;
use serde::de::{DeserializeOwned, IgnoredAny};
use tracing::{debug, info};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::wire::{
    ApiErrorBody, ClusterIdRequest, ClusterInfo, CreateClusterRequest, CreateClusterResponse,
};

const CREATE_PATH: &str = "api/2.0/clusters/create";
const GET_PATH: &str = "api/2.0/clusters/get";
const DELETE_PATH: &str = "api/2.0/clusters/permanent-delete";

/// [`ClusterApi`] backed by a Databricks workspace.
pub struct HttpClusterApi {
    config: Arc<ApiConfig>,
    base: Url,
    token: String,
    http_client: reqwest::Client,
}

impl HttpClusterApi {
    /// Create a client for the configured host.
    pub fn new(config: ApiConfig, token: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let host = config
            .host
            .clone()
            .ok_or_else(|| Error::config_error("No API host configured"))?;

        let mut base = host;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            base,
            token: token.into(),
            http_client,
        })
    }

    /// Create a client using the token from the configured environment variable.
    pub fn from_env(config: ApiConfig) -> Result<Self> {
        let token = config.token_from_env()?;
        Self::new(config, token)
    }

    /// Get the configuration.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Create a cluster, returning its id.
    pub async fn create_cluster(
        &self,
        spec: &ClusterSpec,
        key: &IdempotencyKey,
    ) -> Result<ExternalId> {
        let url = self.base.join(CREATE_PATH)?;
        let body = serde_json::to_value(CreateClusterRequest::new(spec, key))?;
        debug!(cluster_name = %spec.cluster_name, %key, "Creating cluster");

        let response: CreateClusterResponse = self.execute(Method::POST, &url, Some(&body)).await?;
        let external_id = response.external_id();
        info!(cluster_name = %spec.cluster_name, %external_id, "Cluster created");
        Ok(external_id)
    }

    /// Fetch the current status of a cluster.
    pub async fn get_cluster(&self, external_id: &ExternalId) -> Result<StatusSnapshot> {
        let mut url = self.base.join(GET_PATH)?;
        url.query_pairs_mut()
            .append_pair("cluster_id", external_id.as_str());

        let info: ClusterInfo = self.execute(Method::GET, &url, None).await?;
        Ok(info.into())
    }

    /// Permanently delete a cluster.
    pub async fn delete_cluster(&self, external_id: &ExternalId) -> Result<()> {
        let url = self.base.join(DELETE_PATH)?;
        let body = serde_json::to_value(ClusterIdRequest {
            cluster_id: external_id.as_str(),
        })?;
        debug!(%external_id, "Deleting cluster");

        let _: IgnoredAny = self.execute(Method::POST, &url, Some(&body)).await?;
        info!(%external_id, "Cluster deleted");
        Ok(())
    }

    /// Execute a request, retrying retryable failures with doubling delays.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            match self.execute_request(method.clone(), url, body).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt >= self.config.max_retries || !e.is_retryable() {
                        return Err(e);
                    }

                    let delay = self.config.retry_delay(attempt);
                    info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after error (attempt {}/{})",
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Execute a single request attempt.
    async fn execute_request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let timeout_ms = u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);

        let mut request = self
            .http_client
            .request(method, url.as_ref())
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_transport(e, timeout_ms))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::from_transport(e, timeout_ms))?;

        if !status.is_success() {
            let error: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
            let message = error
                .message
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                error_code: error.error_code,
                message,
                cluster_id: error.cluster_id,
            });
        }

        // Delete answers with an empty body.
        let text = if text.trim().is_empty() { "{}" } else { &text };
        serde_json::from_str(text)
            .map_err(|e| Error::invalid_response(format!("Failed to parse response: {e}")))
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn create(&self, spec: &ClusterSpec, key: &IdempotencyKey) -> ApiResult<ExternalId> {
        self.create_cluster(spec, key)
            .await
            .map_err(|e| e.into_cluster_api_error(None))
    }

    async fn get(&self, external_id: &ExternalId) -> ApiResult<StatusSnapshot> {
        self.get_cluster(external_id)
            .await
            .map_err(|e| e.into_cluster_api_error(Some(external_id)))
    }

    async fn delete(&self, external_id: &ExternalId) -> ApiResult<()> {
        self.delete_cluster(external_id)
            .await
            .map_err(|e| e.into_cluster_api_error(Some(external_id)))
    }
}
