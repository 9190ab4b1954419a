//! Record store trait and an in-memory implementation.
//!
//! The store owns three pieces of behavior the reconciler relies on:
//!
//! - every successful write bumps `resource_version`, and a write carrying
//!   a stale version is rejected with [`StoreError::Conflict`];
//! - deleting a record that still carries finalizers only marks it with
//!   `deletion_requested_at`;
//! - a deletion-requested record whose last finalizer is removed is
//!   physically dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dcluster_core::{ExternalId, Identity, Record, ResourceVersion};
use itertools::Itertools;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::error::ErrorClass;

/// Errors returned by a record store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record '{identity}' not found")]
    NotFound { identity: Identity },

    #[error("stale update of '{identity}': expected version {expected}, store has {actual}")]
    Conflict {
        identity: Identity,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    #[error("record '{identity}' already exists")]
    AlreadyExists { identity: Identity },

    #[error("record store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Whether the record does not exist.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the write was based on a stale version.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Classify for retry purposes.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::AlreadyExists { .. } => ErrorClass::Permanent,
            Self::NotFound { .. } | Self::Unavailable { .. } => ErrorClass::Transient,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed access to records with optimistic concurrency.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the current copy of a record.
    async fn get(&self, identity: &Identity) -> StoreResult<Record>;

    /// Write a record back. Fails with `Conflict` if `record.resource_version`
    /// is not the stored version. Returns the stored copy with its new version.
    async fn update(&self, record: &Record) -> StoreResult<Record>;

    /// Identities of every stored record.
    async fn list(&self) -> StoreResult<Vec<Identity>>;
}

#[derive(Default)]
struct Inner {
    records: HashMap<Identity, Record>,
    history: Option<HashMap<Identity, Vec<Record>>>,
    by_external_id: HashMap<ExternalId, Identity>,
    last_version: u64,
    pending_conflicts: u32,
    pending_get_failures: u32,
    pending_update_failures: u32,
}

impl Inner {
    fn next_version(&mut self) -> ResourceVersion {
        self.last_version = self.last_version.saturating_add(1);
        ResourceVersion::new(self.last_version)
    }

    fn commit(&mut self, record: Record) {
        if let Some(id) = record.status.external_id.clone() {
            self.by_external_id.insert(id, record.identity.clone());
        }
        if let Some(history) = self.history.as_mut() {
            history
                .entry(record.identity.clone())
                .or_default()
                .push(record.clone());
        }
        self.records.insert(record.identity.clone(), record);
    }

    fn remove(&mut self, identity: &Identity) -> Option<Record> {
        let removed = self.records.remove(identity)?;
        if let Some(id) = removed.status.external_id.as_ref() {
            self.by_external_id.remove(id);
        }
        Some(removed)
    }
}

/// In-memory record store.
///
/// Besides the [`RecordStore`] contract it offers the user-facing
/// operations (`create`, `delete`), a change feed, an index by external
/// cluster id and fault injection for tests. Write history is kept only
/// when enabled with [`InMemoryRecordStore::recording_history`].
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<Identity>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner::default()),
            changes,
        }
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Keep every committed version of every record, for inspection in tests.
    #[must_use]
    pub fn recording_history(mut self) -> Self {
        self.inner.get_mut().history.get_or_insert_with(HashMap::new);
        self
    }

    /// Subscribe to identities of records that changed.
    pub fn watch(&self) -> broadcast::Receiver<Identity> {
        self.changes.subscribe()
    }

    fn notify(&self, identity: &Identity) {
        // Nobody watching is fine.
        let _ = self.changes.send(identity.clone());
    }

    /// Store a new record as a user would.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the identity is taken.
    pub async fn create(&self, record: Record) -> StoreResult<Record> {
        let stored = {
            let mut inner = self.inner.write().await;
            if inner.records.contains_key(&record.identity) {
                return Err(StoreError::AlreadyExists {
                    identity: record.identity,
                });
            }
            let mut stored = record;
            stored.resource_version = inner.next_version();
            stored.deletion_requested_at = None;
            inner.commit(stored.clone());
            stored
        };
        debug!(identity = %stored.identity, uid = %stored.uid, "Record created");
        self.notify(&stored.identity);
        Ok(stored)
    }

    /// Ask for a record to be deleted.
    ///
    /// Returns `Some(record)` if the record was only marked (finalizers
    /// present) and `None` if it was removed outright.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record does not exist.
    pub async fn delete(&self, identity: &Identity) -> StoreResult<Option<Record>> {
        let marked = {
            let mut inner = self.inner.write().await;
            let current = inner
                .records
                .get(identity)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    identity: identity.clone(),
                })?;

            if current.finalizers.is_empty() {
                inner.remove(identity);
                None
            } else if current.is_being_deleted() {
                Some(current)
            } else {
                let mut marked = current;
                marked.deletion_requested_at = Some(Utc::now());
                marked.resource_version = inner.next_version();
                inner.commit(marked.clone());
                Some(marked)
            }
        };
        debug!(identity = %identity, removed = marked.is_none(), "Record deletion requested");
        self.notify(identity);
        Ok(marked)
    }

    /// Identities of records referencing the given external cluster.
    pub async fn find_by_external_id(&self, external_id: &ExternalId) -> Option<Identity> {
        self.inner.read().await.by_external_id.get(external_id).cloned()
    }

    /// Every committed version of a record, oldest first. Survives removal.
    /// Empty unless history recording is enabled.
    pub async fn history(&self, identity: &Identity) -> Vec<Record> {
        self.inner
            .read()
            .await
            .history
            .as_ref()
            .and_then(|history| history.get(identity))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a record is currently stored.
    pub async fn contains(&self, identity: &Identity) -> bool {
        self.inner.read().await.records.contains_key(identity)
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make the next `count` updates fail with a conflict, as if another
    /// writer got there first.
    pub async fn inject_conflicts(&self, count: u32) {
        self.inner.write().await.pending_conflicts = count;
    }

    /// Make the next `count` reads fail with `Unavailable`.
    pub async fn fail_next_gets(&self, count: u32) {
        self.inner.write().await.pending_get_failures = count;
    }

    /// Make the next `count` updates fail with `Unavailable`.
    pub async fn fail_next_updates(&self, count: u32) {
        self.inner.write().await.pending_update_failures = count;
    }

    /// Simulate an unrelated writer touching the record (bumps its version).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record does not exist.
    pub async fn touch(&self, identity: &Identity) -> StoreResult<Record> {
        let mut inner = self.inner.write().await;
        let mut current = inner
            .records
            .get(identity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.clone(),
            })?;
        current.resource_version = inner.next_version();
        inner.commit(current.clone());
        Ok(current)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, identity: &Identity) -> StoreResult<Record> {
        let mut inner = self.inner.write().await;
        if inner.pending_get_failures > 0 {
            inner.pending_get_failures = inner.pending_get_failures.saturating_sub(1);
            return Err(StoreError::unavailable("injected read failure"));
        }
        inner
            .records
            .get(identity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                identity: identity.clone(),
            })
    }

    async fn update(&self, record: &Record) -> StoreResult<Record> {
        let identity = record.identity.clone();
        let (stored, removed) = {
            let mut inner = self.inner.write().await;
            if inner.pending_update_failures > 0 {
                inner.pending_update_failures = inner.pending_update_failures.saturating_sub(1);
                return Err(StoreError::unavailable("injected write failure"));
            }

            let current = inner
                .records
                .get(&identity)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    identity: identity.clone(),
                })?;

            if inner.pending_conflicts > 0 {
                inner.pending_conflicts = inner.pending_conflicts.saturating_sub(1);
                let mut bumped = current.clone();
                bumped.resource_version = inner.next_version();
                inner.commit(bumped.clone());
                return Err(StoreError::Conflict {
                    identity,
                    expected: record.resource_version,
                    actual: bumped.resource_version,
                });
            }

            if current.resource_version != record.resource_version || current.uid != record.uid
            {
                return Err(StoreError::Conflict {
                    identity,
                    expected: record.resource_version,
                    actual: current.resource_version,
                });
            }

            let mut stored = record.clone();
            stored.resource_version = inner.next_version();
            // Only the store sets or clears the deletion marker.
            stored.deletion_requested_at = current.deletion_requested_at;

            inner.commit(stored.clone());
            let removed = stored.is_being_deleted() && stored.finalizers.is_empty();
            if removed {
                inner.remove(&identity);
            }
            (stored, removed)
        };

        trace!(
            identity = %identity,
            version = %stored.resource_version,
            removed,
            "Record updated"
        );
        self.notify(&identity);
        Ok(stored)
    }

    async fn list(&self) -> StoreResult<Vec<Identity>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .keys()
            .cloned()
            .sorted()
            .collect())
    }
}
