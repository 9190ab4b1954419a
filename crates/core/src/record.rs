//! The declarative cluster record and its status.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ExternalId, Identity, RecordUid, ResourceVersion};

/// Desired cluster configuration declared by the user.
///
/// The reconciler treats this as opaque and hands it to the cluster API
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    pub spark_version: String,
    pub node_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_node_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<Autoscale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotermination_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_tags: BTreeMap<String, String>,
}

impl ClusterSpec {
    /// Create a fixed-size cluster spec.
    pub fn new(
        cluster_name: impl Into<String>,
        spark_version: impl Into<String>,
        node_type_id: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            spark_version: spark_version.into(),
            node_type_id: node_type_id.into(),
            ..Self::default()
        }
    }

    /// Set a fixed worker count.
    #[must_use]
    pub const fn with_num_workers(mut self, num_workers: u32) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    /// Enable autoscaling between the given bounds.
    #[must_use]
    pub const fn with_autoscale(mut self, min_workers: u32, max_workers: u32) -> Self {
        self.autoscale = Some(Autoscale {
            min_workers,
            max_workers,
        });
        self
    }

    /// Add a custom tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_tags.insert(key.into(), value.into());
        self
    }
}

/// Autoscaling bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoscale {
    pub min_workers: u32,
    pub max_workers: u32,
}

/// Lifecycle state reported by the cluster API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalState {
    Pending,
    Running,
    Restarting,
    Resizing,
    Terminating,
    Terminated,
    Error,
    #[serde(other)]
    Unknown,
}

impl ExternalState {
    /// Whether the cluster has stopped and will not come back without action.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

impl std::fmt::Display for ExternalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Resizing => "resizing",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Last observed state of the external cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: ExternalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
}

impl StatusSnapshot {
    /// Snapshot with only a state.
    pub const fn new(state: ExternalState) -> Self {
        Self {
            state,
            state_message: None,
            num_workers: None,
        }
    }

    /// Attach a state message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.state_message = Some(message.into());
        self
    }

    /// Attach the observed worker count.
    #[must_use]
    pub const fn with_num_workers(mut self, num_workers: u32) -> Self {
        self.num_workers = Some(num_workers);
        self
    }
}

/// Observed status of a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<ExternalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_state: Option<StatusSnapshot>,
}

/// One managed cluster: desired spec plus observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub identity: Identity,
    pub uid: RecordUid,
    pub resource_version: ResourceVersion,
    pub spec: ClusterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub finalizers: BTreeSet<String>,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Record {
    /// A record as a user would submit it, before the store assigns a version.
    pub fn new(identity: Identity, spec: ClusterSpec) -> Self {
        Self {
            identity,
            uid: RecordUid::new(),
            resource_version: ResourceVersion::default(),
            spec,
            deletion_requested_at: None,
            finalizers: BTreeSet::new(),
            status: ClusterStatus::default(),
        }
    }

    /// Whether a user asked for this record to be deleted.
    pub const fn is_being_deleted(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    /// Whether the named guard marker is attached.
    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.contains(name)
    }

    /// Whether the external cluster has been created for this record.
    pub const fn is_submitted(&self) -> bool {
        self.status.external_id.is_some()
    }

    /// External cluster id, if submitted.
    pub const fn external_id(&self) -> Option<&ExternalId> {
        self.status.external_id.as_ref()
    }
}
