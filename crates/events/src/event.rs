//! Reconcile outcome events.

use chrono::{DateTime, Utc};
use dcluster_core::{ExternalId, ExternalState, Identity};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Create a new random event ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the inner ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of an event, as shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

/// What happened during one reconcile invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The deletion guard was attached.
    GuardAdded,
    /// The external cluster was created and its id recorded.
    Submitted { external_id: ExternalId },
    /// External teardown finished and the guard was removed.
    TeardownComplete { external_id: Option<ExternalId> },
    /// The external status was fetched.
    Refreshed {
        state: ExternalState,
        drifted: bool,
    },
    /// An action failed.
    Failed {
        action: String,
        reason: String,
        retryable: bool,
    },
}

/// One reconcile outcome, attributed to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub event_id: EventId,
    pub identity: Identity,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl ReconcileEvent {
    fn new(identity: Identity, kind: EventKind) -> Self {
        Self {
            event_id: EventId::new(),
            identity,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Create a GuardAdded event.
    pub fn guard_added(identity: Identity) -> Self {
        Self::new(identity, EventKind::GuardAdded)
    }

    /// Create a Submitted event.
    pub fn submitted(identity: Identity, external_id: ExternalId) -> Self {
        Self::new(identity, EventKind::Submitted { external_id })
    }

    /// Create a TeardownComplete event.
    pub fn teardown_complete(identity: Identity, external_id: Option<ExternalId>) -> Self {
        Self::new(identity, EventKind::TeardownComplete { external_id })
    }

    /// Create a Refreshed event.
    pub fn refreshed(identity: Identity, state: ExternalState, drifted: bool) -> Self {
        Self::new(identity, EventKind::Refreshed { state, drifted })
    }

    /// Create a Failed event.
    pub fn failed(
        identity: Identity,
        action: impl Into<String>,
        reason: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::new(
            identity,
            EventKind::Failed {
                action: action.into(),
                reason: reason.into(),
                retryable,
            },
        )
    }

    /// Severity of this event.
    pub fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::Failed { .. } => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self.kind {
            EventKind::GuardAdded => "Added",
            EventKind::Submitted { .. } => "Submitted",
            EventKind::TeardownComplete { .. } => "Deleted",
            EventKind::Refreshed { .. } => "Refreshed",
            EventKind::Failed { .. } => "Failed",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        match &self.kind {
            EventKind::GuardAdded => "Object finalizer is added".to_string(),
            EventKind::Submitted { external_id } => {
                format!("Cluster {external_id} is submitted")
            }
            EventKind::TeardownComplete { external_id: Some(id) } => {
                format!("Cluster {id} is deleted and the finalizer removed")
            }
            EventKind::TeardownComplete { external_id: None } => {
                "Object finalizer is deleted".to_string()
            }
            EventKind::Refreshed { state, drifted } => {
                if *drifted {
                    format!("Cluster state changed to {state}")
                } else {
                    format!("Cluster is {state}")
                }
            }
            EventKind::Failed {
                action,
                reason,
                retryable,
            } => {
                let class = if *retryable { "will retry" } else { "permanent" };
                format!("Failed to {action} ({class}): {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn identity() -> dcluster_core::Result<Identity> {
        Identity::new("analytics", "etl")
    }

    #[test]
    fn test_guard_added_event() -> TestResult {
        let id = identity()?;
        let event = ReconcileEvent::guard_added(id.clone());
        assert_eq!(event.identity, id);
        assert_eq!(event.event_type(), EventType::Normal);
        assert_eq!(event.reason(), "Added");
        Ok(())
    }

    #[test]
    fn test_failed_event_is_warning() -> TestResult {
        let id = identity()?;
        let event = ReconcileEvent::failed(id, "submit", "quota exceeded", false);
        assert_eq!(event.event_type(), EventType::Warning);
        assert!(event.message().contains("permanent"));
        assert!(event.message().contains("quota exceeded"));
        Ok(())
    }

    #[test]
    fn test_refreshed_message_mentions_drift() -> TestResult {
        let id = identity()?;
        let drifted = ReconcileEvent::refreshed(id.clone(), ExternalState::Running, true);
        assert!(drifted.message().contains("changed"));
        let steady = ReconcileEvent::refreshed(id, ExternalState::Running, false);
        assert!(!steady.message().contains("changed"));
        Ok(())
    }
}
