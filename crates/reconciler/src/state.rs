//! Explicit reconcile state, derived once per invocation.

use dcluster_core::{ExternalId, Record};

/// Where a record is in its lifecycle.
///
/// Derived from a freshly read record in a fixed precedence: absent,
/// deleting, unguarded, unsubmitted, submitted. A deletion request wins
/// over everything else, so no create is ever issued for a record that is
/// being deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    /// The store has no such record.
    Absent,
    /// Deletion was requested.
    Deleting(Record),
    /// The guard is not attached yet.
    Unguarded(Record),
    /// Guarded, no external cluster recorded.
    Unsubmitted(Record),
    /// Guarded, external cluster recorded.
    Submitted(Record, ExternalId),
}

impl ReconcileState {
    /// Derive the state of a record.
    pub fn derive(record: Option<Record>, guard_name: &str) -> Self {
        let Some(record) = record else {
            return Self::Absent;
        };
        if record.is_being_deleted() {
            return Self::Deleting(record);
        }
        if !record.has_finalizer(guard_name) {
            return Self::Unguarded(record);
        }
        match record.status.external_id.clone() {
            None => Self::Unsubmitted(record),
            Some(external_id) => Self::Submitted(record, external_id),
        }
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Deleting(_) => "deleting",
            Self::Unguarded(_) => "unguarded",
            Self::Unsubmitted(_) => "unsubmitted",
            Self::Submitted(..) => "submitted",
        }
    }

    /// The record, unless absent.
    pub const fn record(&self) -> Option<&Record> {
        match self {
            Self::Absent => None,
            Self::Deleting(record)
            | Self::Unguarded(record)
            | Self::Unsubmitted(record)
            | Self::Submitted(record, _) => Some(record),
        }
    }
}

impl std::fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
