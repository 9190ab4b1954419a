//! Types describing what one reconcile invocation did.

use std::time::Duration;

use dcluster_core::{ExternalId, Identity, Record, StatusSnapshot};
use dcluster_events::ReconcileEvent;
use serde::{Deserialize, Serialize};

/// Side-effecting actions the engine can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconcileAction {
    /// Attach the deletion guard to the record.
    AttachGuard,
    /// Create the external cluster and record its id.
    Submit,
    /// Delete the external cluster and release the guard.
    Teardown,
    /// Fetch the external cluster status.
    Refresh,
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttachGuard => write!(f, "attach guard"),
            Self::Submit => write!(f, "submit"),
            Self::Teardown => write!(f, "tear down"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// When the dispatcher should look at the record again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next change notification or resync.
    Never,
    /// After the given delay.
    After(Duration),
}

impl Requeue {
    /// The delay, if any.
    pub const fn delay(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(delay) => Some(delay),
        }
    }
}

/// The effect of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The record does not exist.
    Nothing,
    /// The guard was attached.
    GuardAttached,
    /// The external cluster exists and its id is recorded.
    Submitted {
        external_id: ExternalId,
        /// The API returned an existing cluster for this record.
        deduplicated: bool,
    },
    /// Teardown is confirmed and the guard released.
    TornDown { external_id: Option<ExternalId> },
    /// The status was fetched.
    Refreshed {
        snapshot: StatusSnapshot,
        /// Whether the snapshot differed from the recorded one.
        drifted: bool,
    },
}

/// Result of one successful reconcile invocation.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    /// Which record was reconciled.
    pub identity: Identity,
    /// What was done.
    pub applied: Applied,
    /// When to look again.
    pub requeue: Requeue,
    /// The record as last written or read, if it still exists.
    pub record: Option<Record>,
}

impl ReconcileResult {
    /// The action that ran, if any.
    pub const fn action(&self) -> Option<ReconcileAction> {
        match self.applied {
            Applied::Nothing => None,
            Applied::GuardAttached => Some(ReconcileAction::AttachGuard),
            Applied::Submitted { .. } => Some(ReconcileAction::Submit),
            Applied::TornDown { .. } => Some(ReconcileAction::Teardown),
            Applied::Refreshed { .. } => Some(ReconcileAction::Refresh),
        }
    }

    /// The event describing this outcome. `None` for an absent record.
    pub fn to_event(&self) -> Option<ReconcileEvent> {
        let identity = self.identity.clone();
        match &self.applied {
            Applied::Nothing => None,
            Applied::GuardAttached => Some(ReconcileEvent::guard_added(identity)),
            Applied::Submitted { external_id, .. } => {
                Some(ReconcileEvent::submitted(identity, external_id.clone()))
            }
            Applied::TornDown { external_id } => {
                Some(ReconcileEvent::teardown_complete(identity, external_id.clone()))
            }
            Applied::Refreshed { snapshot, drifted } => Some(ReconcileEvent::refreshed(
                identity,
                snapshot.state,
                *drifted,
            )),
        }
    }
}
