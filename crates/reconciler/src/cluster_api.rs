//! Cluster API trait and an in-memory fake.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use dcluster_core::{ClusterSpec, ExternalId, ExternalState, StatusSnapshot};
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorClass;
use crate::idempotency::IdempotencyKey;

/// Errors returned by a cluster API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterApiError {
    /// The cluster does not exist.
    #[error("cluster {external_id} does not exist")]
    NotFound { external_id: ExternalId },

    /// A create matched a cluster that already exists for this key.
    #[error("cluster {external_id} already exists")]
    Duplicate { external_id: ExternalId },

    /// Network failure, timeout, throttling or a server-side error.
    #[error("transient cluster API failure: {reason}")]
    Transient { reason: String },

    /// The request was rejected and will be rejected again.
    #[error("cluster API rejected the request: {reason}")]
    Permanent { reason: String },
}

impl ClusterApiError {
    /// Create a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Create a permanent error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(external_id: &ExternalId) -> Self {
        Self::NotFound {
            external_id: external_id.clone(),
        }
    }

    /// Whether the cluster does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the same call may succeed later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify for retry purposes.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Permanent { .. } => ErrorClass::Permanent,
            Self::NotFound { .. } | Self::Duplicate { .. } | Self::Transient { .. } => {
                ErrorClass::Transient
            }
        }
    }
}

/// Result type for cluster API calls.
pub type ApiResult<T> = std::result::Result<T, ClusterApiError>;

/// The external cluster management API.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a cluster. Calls with the same key yield the same cluster.
    async fn create(&self, spec: &ClusterSpec, key: &IdempotencyKey) -> ApiResult<ExternalId>;

    /// Fetch the current status of a cluster.
    async fn get(&self, external_id: &ExternalId) -> ApiResult<StatusSnapshot>;

    /// Permanently delete a cluster.
    async fn delete(&self, external_id: &ExternalId) -> ApiResult<()>;
}

/// Operations recorded by [`InMemoryClusterApi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    Create,
    Get,
    Delete,
}

/// One call made against [`InMemoryClusterApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create {
        key: IdempotencyKey,
        cluster_name: String,
    },
    Get {
        external_id: ExternalId,
    },
    Delete {
        external_id: ExternalId,
    },
}

impl ApiCall {
    /// Which operation this call was.
    pub const fn operation(&self) -> ApiOperation {
        match self {
            Self::Create { .. } => ApiOperation::Create,
            Self::Get { .. } => ApiOperation::Get,
            Self::Delete { .. } => ApiOperation::Delete,
        }
    }
}

#[derive(Default)]
struct FakeState {
    clusters: HashMap<ExternalId, StatusSnapshot>,
    by_key: HashMap<IdempotencyKey, ExternalId>,
    calls: Vec<ApiCall>,
    scripted: HashMap<ApiOperation, VecDeque<ClusterApiError>>,
    next_id: u64,
    report_duplicates: bool,
}

/// In-memory cluster API.
///
/// Creates are deduplicated by idempotency key. Failures can be scripted
/// per operation; each scripted error is returned once, in order, after the
/// call has been logged.
#[derive(Default)]
pub struct InMemoryClusterApi {
    state: Mutex<FakeState>,
}

impl InMemoryClusterApi {
    /// Create an empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer a create with an already-used key with `Duplicate` instead of
    /// the existing id.
    #[must_use]
    pub fn reporting_duplicates(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.report_duplicates = true;
        }
        self
    }

    /// Queue an error for the next call of `operation`.
    pub fn fail_next(&self, operation: ApiOperation, error: ClusterApiError) {
        if let Ok(mut state) = self.state.lock() {
            state.scripted.entry(operation).or_default().push_back(error);
        }
    }

    /// Set the state reported for a cluster.
    pub fn set_state(&self, external_id: &ExternalId, snapshot: StatusSnapshot) {
        if let Ok(mut state) = self.state.lock() {
            state.clusters.insert(external_id.clone(), snapshot);
        }
    }

    /// Forget a cluster, as if it was deleted out of band.
    pub fn remove_cluster(&self, external_id: &ExternalId) {
        if let Ok(mut state) = self.state.lock() {
            state.clusters.remove(external_id);
        }
    }

    /// Whether a cluster currently exists.
    pub fn contains(&self, external_id: &ExternalId) -> bool {
        self.state
            .lock()
            .map(|state| state.clusters.contains_key(external_id))
            .unwrap_or(false)
    }

    /// Every call made, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Number of calls of one operation.
    pub fn count(&self, operation: ApiOperation) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .calls
                    .iter()
                    .filter(|call| call.operation() == operation)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of create calls.
    pub fn create_count(&self) -> usize {
        self.count(ApiOperation::Create)
    }

    /// Number of clusters that exist.
    pub fn cluster_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.clusters.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> ApiResult<std::sync::MutexGuard<'_, FakeState>> {
        self.state
            .lock()
            .map_err(|_| ClusterApiError::transient("fake cluster API state poisoned"))
    }
}

impl FakeState {
    fn take_scripted(&mut self, operation: ApiOperation) -> Option<ClusterApiError> {
        self.scripted.get_mut(&operation)?.pop_front()
    }
}

#[async_trait]
impl ClusterApi for InMemoryClusterApi {
    async fn create(&self, spec: &ClusterSpec, key: &IdempotencyKey) -> ApiResult<ExternalId> {
        let mut state = self.lock()?;
        state.calls.push(ApiCall::Create {
            key: *key,
            cluster_name: spec.cluster_name.clone(),
        });
        if let Some(error) = state.take_scripted(ApiOperation::Create) {
            return Err(error);
        }

        if let Some(existing) = state.by_key.get(key).cloned() {
            debug!(external_id = %existing, key = %key, "Create deduplicated by key");
            if state.report_duplicates {
                return Err(ClusterApiError::Duplicate {
                    external_id: existing,
                });
            }
            return Ok(existing);
        }

        state.next_id = state.next_id.saturating_add(1);
        let external_id = ExternalId::new(format!("0000-{:06}-fake", state.next_id));
        state
            .clusters
            .insert(external_id.clone(), StatusSnapshot::new(ExternalState::Pending));
        state.by_key.insert(*key, external_id.clone());
        Ok(external_id)
    }

    async fn get(&self, external_id: &ExternalId) -> ApiResult<StatusSnapshot> {
        let mut state = self.lock()?;
        state.calls.push(ApiCall::Get {
            external_id: external_id.clone(),
        });
        if let Some(error) = state.take_scripted(ApiOperation::Get) {
            return Err(error);
        }
        state
            .clusters
            .get(external_id)
            .cloned()
            .ok_or_else(|| ClusterApiError::not_found(external_id))
    }

    async fn delete(&self, external_id: &ExternalId) -> ApiResult<()> {
        let mut state = self.lock()?;
        state.calls.push(ApiCall::Delete {
            external_id: external_id.clone(),
        });
        if let Some(error) = state.take_scripted(ApiOperation::Delete) {
            return Err(error);
        }
        state
            .clusters
            .remove(external_id)
            .map(|_| ())
            .ok_or_else(|| ClusterApiError::not_found(external_id))
    }
}
