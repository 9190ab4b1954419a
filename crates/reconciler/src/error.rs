//! Error types for the reconciler crate.

use dcluster_core::{ExternalId, Identity};
use thiserror::Error;

use crate::cluster_api::ClusterApiError;
use crate::store::StoreError;
use crate::types::ReconcileAction;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How the dispatcher should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network trouble, throttling, a store hiccup. Retry from the same state.
    Transient,
    /// Stale `resource_version`. Re-read and decide again.
    Conflict,
    /// Retrying will not help until something outside changes.
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Conflict => write!(f, "conflict"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Reading the record failed for a reason other than NotFound.
    #[error("failed to read record '{identity}': {source}")]
    Fetch {
        identity: Identity,
        #[source]
        source: StoreError,
    },

    /// Writing the record back failed.
    #[error("failed to persist record '{identity}' during {action}: {source}")]
    Persist {
        identity: Identity,
        action: ReconcileAction,
        #[source]
        source: StoreError,
    },

    /// The cluster API rejected or failed a call.
    #[error("cluster API call failed during {action} for '{identity}': {source}")]
    ClusterApi {
        identity: Identity,
        action: ReconcileAction,
        #[source]
        source: ClusterApiError,
    },

    /// A cluster was created but its id could not be recorded on the record.
    #[error("cluster {external_id} was created for '{identity}' but could not be recorded: {reason}")]
    OrphanedCluster {
        identity: Identity,
        external_id: ExternalId,
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a fetch error.
    pub fn fetch(identity: &Identity, source: StoreError) -> Self {
        Self::Fetch {
            identity: identity.clone(),
            source,
        }
    }

    /// Create a persist error.
    pub fn persist(identity: &Identity, action: ReconcileAction, source: StoreError) -> Self {
        Self::Persist {
            identity: identity.clone(),
            action,
            source,
        }
    }

    /// Create a cluster API error.
    pub fn cluster_api(
        identity: &Identity,
        action: ReconcileAction,
        source: ClusterApiError,
    ) -> Self {
        Self::ClusterApi {
            identity: identity.clone(),
            action,
            source,
        }
    }

    /// Create an orphaned cluster error.
    pub fn orphaned_cluster(
        identity: &Identity,
        external_id: &ExternalId,
        reason: impl Into<String>,
    ) -> Self {
        Self::OrphanedCluster {
            identity: identity.clone(),
            external_id: external_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// The action that was running when the error happened, if any.
    pub const fn action(&self) -> Option<ReconcileAction> {
        match self {
            Self::Persist { action, .. } | Self::ClusterApi { action, .. } => Some(*action),
            Self::OrphanedCluster { .. } => Some(ReconcileAction::Submit),
            Self::Fetch { .. } | Self::InvalidConfig { .. } => None,
        }
    }

    /// Classify the error for retry purposes.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Fetch { source, .. } | Self::Persist { source, .. } => source.class(),
            Self::ClusterApi { source, .. } => source.class(),
            // A retry re-enters submit with the same idempotency key and picks
            // the existing cluster back up.
            Self::OrphanedCluster { .. } => ErrorClass::Transient,
            Self::InvalidConfig { .. } => ErrorClass::Permanent,
        }
    }

    /// Whether the failure was a stale-version conflict on update.
    pub const fn is_conflict(&self) -> bool {
        matches!(self.class(), ErrorClass::Conflict)
    }

    /// Whether retrying later may succeed without outside intervention.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.class(), ErrorClass::Permanent)
    }
}
