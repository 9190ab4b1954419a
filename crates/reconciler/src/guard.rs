//! Deletion guard bookkeeping.

use std::sync::Arc;

use dcluster_core::Record;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::RecordStore;
use crate::types::ReconcileAction;

/// Adds and removes this engine's guard marker on records.
///
/// While the guard is present the store will not physically remove a
/// record, even after deletion is requested.
#[derive(Clone)]
pub struct GuardManager {
    store: Arc<dyn RecordStore>,
    guard_name: String,
}

impl GuardManager {
    /// Create a manager for the given guard name.
    pub fn new(store: Arc<dyn RecordStore>, guard_name: impl Into<String>) -> Self {
        Self {
            store,
            guard_name: guard_name.into(),
        }
    }

    /// Name of the guard marker.
    pub fn guard_name(&self) -> &str {
        &self.guard_name
    }

    /// Whether the record carries this guard.
    pub fn is_guarded(&self, record: &Record) -> bool {
        record.has_finalizer(&self.guard_name)
    }

    /// Attach the guard and persist. A record that already has it is
    /// returned unchanged without a write.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persist` if the write fails, including on conflict.
    pub async fn attach(&self, record: &Record) -> Result<Record> {
        if self.is_guarded(record) {
            return Ok(record.clone());
        }
        let mut updated = record.clone();
        updated.finalizers.insert(self.guard_name.clone());
        let stored = self
            .store
            .update(&updated)
            .await
            .map_err(|e| Error::persist(&record.identity, ReconcileAction::AttachGuard, e))?;
        debug!(identity = %record.identity, guard = %self.guard_name, "Guard attached");
        Ok(stored)
    }

    /// Remove the guard and persist. A record without it is returned
    /// unchanged without a write.
    ///
    /// The returned record may already be gone from the store if this was
    /// the last guard of a deletion-requested record.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persist` if the write fails, including on conflict.
    pub async fn release(&self, record: &Record) -> Result<Record> {
        if !self.is_guarded(record) {
            return Ok(record.clone());
        }
        let mut updated = record.clone();
        updated.finalizers.remove(&self.guard_name);
        let stored = self
            .store
            .update(&updated)
            .await
            .map_err(|e| Error::persist(&record.identity, ReconcileAction::Teardown, e))?;
        debug!(identity = %record.identity, guard = %self.guard_name, "Guard released");
        Ok(stored)
    }
}
