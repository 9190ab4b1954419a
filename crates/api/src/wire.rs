//! Request and response bodies of the Clusters API 2.0.

use dcluster_core::{ClusterSpec, ExternalId, ExternalState, StatusSnapshot};
use dcluster_reconciler::IdempotencyKey;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/2.0/clusters/create`.
#[derive(Debug, Serialize)]
pub struct CreateClusterRequest<'a> {
    #[serde(flatten)]
    pub spec: &'a ClusterSpec,
    /// Repeating a create with the same token returns the original cluster.
    pub idempotency_token: String,
}

impl<'a> CreateClusterRequest<'a> {
    pub fn new(spec: &'a ClusterSpec, key: &IdempotencyKey) -> Self {
        Self {
            spec,
            idempotency_token: key.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateClusterResponse {
    pub cluster_id: String,
}

impl CreateClusterResponse {
    pub fn external_id(self) -> ExternalId {
        ExternalId::new(self.cluster_id)
    }
}

/// Body of `POST /api/2.0/clusters/permanent-delete`.
#[derive(Debug, Serialize)]
pub struct ClusterIdRequest<'a> {
    pub cluster_id: &'a str,
}

/// Subset of the `clusters/get` response the operator reports.
#[derive(Debug, Deserialize)]
pub struct ClusterInfo {
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default = "unknown_state")]
    pub state: ExternalState,
    #[serde(default)]
    pub state_message: Option<String>,
    #[serde(default)]
    pub num_workers: Option<u32>,
}

impl From<ClusterInfo> for StatusSnapshot {
    fn from(info: ClusterInfo) -> Self {
        let mut snapshot = Self::new(info.state);
        if let Some(message) = info.state_message.filter(|m| !m.is_empty()) {
            snapshot = snapshot.with_message(message);
        }
        if let Some(workers) = info.num_workers {
            snapshot = snapshot.with_num_workers(workers);
        }
        snapshot
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<String>,
}

const fn unknown_state() -> ExternalState {
    ExternalState::Unknown
}
