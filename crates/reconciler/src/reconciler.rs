//! Reconciler implementation.

use std::sync::Arc;
use std::time::Duration;

use dcluster_core::{ExternalId, Identity, Record};
use dcluster_events::{EventSink, ReconcileEvent, TracingEventSink};
use tracing::{debug, info, warn};

use crate::cluster_api::{ClusterApi, ClusterApiError};
use crate::error::{Error, Result};
use crate::guard::GuardManager;
use crate::idempotency::IdempotencyKey;
use crate::state::ReconcileState;
use crate::store::RecordStore;
use crate::types::{Applied, ReconcileAction, ReconcileResult, Requeue};

/// Default guard marker name.
pub const DEFAULT_GUARD_NAME: &str = "dcluster.databricks.microsoft.com";

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Name of the deletion guard this engine owns.
    pub guard_name: String,
    /// Re-check delay after a successful side effect.
    pub requeue_after: Duration,
    /// How many times one invocation re-reads after a stale-version conflict.
    pub max_conflict_retries: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            guard_name: DEFAULT_GUARD_NAME.to_string(),
            requeue_after: Duration::from_secs(30),
            max_conflict_retries: 5,
        }
    }
}

impl ReconcilerConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for an empty guard name or a zero
    /// requeue delay.
    pub fn validate(&self) -> Result<()> {
        if self.guard_name.trim().is_empty() {
            return Err(Error::invalid_config("guard name must not be empty"));
        }
        if self.requeue_after.is_zero() {
            return Err(Error::invalid_config("requeue delay must be positive"));
        }
        Ok(())
    }
}

/// Drives one record at a time toward its declared state.
///
/// Each invocation reads the record fresh, derives a [`ReconcileState`],
/// and performs at most one side-effecting action. No record state is kept
/// between invocations.
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    api: Arc<dyn ClusterApi>,
    events: Arc<dyn EventSink>,
    guards: GuardManager,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub fn new(
        store: Arc<dyn RecordStore>,
        api: Arc<dyn ClusterApi>,
        events: Arc<dyn EventSink>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let guards = GuardManager::new(store.clone(), config.guard_name.clone());
        Ok(Self {
            store,
            api,
            events,
            guards,
            config,
        })
    }

    /// Reconcile one record.
    ///
    /// Stale-version conflicts restart the invocation from a fresh read, up
    /// to `max_conflict_retries` times. Exactly one event is emitted per
    /// invocation unless the record is absent.
    ///
    /// # Errors
    ///
    /// Returns the first collaborator error that aborted the invocation.
    pub async fn reconcile(&self, identity: &Identity) -> Result<ReconcileResult> {
        debug!(identity = %identity, "Starting reconcile");

        let mut conflicts = 0_u32;
        let outcome = loop {
            match self.reconcile_once(identity).await {
                Err(e) if e.is_conflict() && conflicts < self.config.max_conflict_retries => {
                    conflicts = conflicts.saturating_add(1);
                    debug!(identity = %identity, conflicts, error = %e, "Conflict, re-reading record");
                }
                other => break other,
            }
        };

        match &outcome {
            Ok(result) => {
                if let Some(event) = result.to_event() {
                    self.events.emit(event);
                }
            }
            Err(e) => {
                let action = e
                    .action()
                    .map_or_else(|| "reconcile".to_string(), |a| a.to_string());
                warn!(
                    identity = %identity,
                    action = %action,
                    class = %e.class(),
                    error = %e,
                    "Reconcile failed"
                );
                self.events.emit(ReconcileEvent::failed(
                    identity.clone(),
                    action,
                    e.to_string(),
                    e.is_retryable(),
                ));
            }
        }

        debug!(identity = %identity, ok = outcome.is_ok(), conflicts, "Finished reconcile");
        outcome
    }

    async fn reconcile_once(&self, identity: &Identity) -> Result<ReconcileResult> {
        let record = match self.store.get(identity).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(Error::fetch(identity, e)),
        };

        let state = ReconcileState::derive(record, &self.config.guard_name);
        debug!(identity = %identity, state = %state, "Derived state");

        match state {
            ReconcileState::Absent => Ok(ReconcileResult {
                identity: identity.clone(),
                applied: Applied::Nothing,
                requeue: Requeue::Never,
                record: None,
            }),
            ReconcileState::Deleting(record) => self.teardown(record).await,
            ReconcileState::Unguarded(record) => self.attach_guard(record).await,
            ReconcileState::Unsubmitted(record) => self.submit(record).await,
            ReconcileState::Submitted(record, external_id) => {
                self.refresh(record, external_id).await
            }
        }
    }

    async fn teardown(&self, record: Record) -> Result<ReconcileResult> {
        let identity = record.identity.clone();
        if !self.guards.is_guarded(&record) {
            // Never guarded by us, so no cluster of ours to delete.
            debug!(identity = %identity, "Deleting record without our guard");
            return Ok(ReconcileResult {
                identity,
                applied: Applied::TornDown { external_id: None },
                requeue: Requeue::Never,
                record: Some(record),
            });
        }

        let external_id = record.status.external_id.clone();
        if let Some(id) = &external_id {
            match self.api.delete(id).await {
                Ok(()) => info!(identity = %identity, external_id = %id, "Cluster deleted"),
                Err(e) if e.is_not_found() => {
                    info!(identity = %identity, external_id = %id, "Cluster already gone");
                }
                Err(e) => return Err(Error::cluster_api(&identity, ReconcileAction::Teardown, e)),
            }
        }

        let stored = self.guards.release(&record).await?;
        info!(identity = %identity, "Guard removed after teardown");
        Ok(ReconcileResult {
            identity,
            applied: Applied::TornDown { external_id },
            requeue: Requeue::Never,
            record: Some(stored),
        })
    }

    async fn attach_guard(&self, record: Record) -> Result<ReconcileResult> {
        let stored = self.guards.attach(&record).await?;
        info!(identity = %record.identity, guard = %self.config.guard_name, "Guard added");
        Ok(ReconcileResult {
            identity: record.identity,
            applied: Applied::GuardAttached,
            requeue: Requeue::After(self.config.requeue_after),
            record: Some(stored),
        })
    }

    async fn submit(&self, record: Record) -> Result<ReconcileResult> {
        let identity = record.identity.clone();
        let key = IdempotencyKey::for_record(&record);

        let (external_id, deduplicated) = match self.api.create(&record.spec, &key).await {
            Ok(id) => (id, false),
            Err(ClusterApiError::Duplicate { external_id }) => (external_id, true),
            Err(e) => return Err(Error::cluster_api(&identity, ReconcileAction::Submit, e)),
        };
        info!(
            identity = %identity,
            external_id = %external_id,
            key = %key,
            deduplicated,
            "Cluster submitted"
        );

        let stored = self.persist_external_id(record, &external_id).await?;
        Ok(ReconcileResult {
            identity,
            applied: Applied::Submitted {
                external_id,
                deduplicated,
            },
            requeue: Requeue::After(self.config.requeue_after),
            record: Some(stored),
        })
    }

    /// Write a freshly created cluster id onto the record.
    ///
    /// A conflict re-reads and re-applies the id instead of aborting, so a
    /// successful create is never dropped. If the id cannot be written the
    /// error names the cluster.
    async fn persist_external_id(&self, record: Record, external_id: &ExternalId) -> Result<Record> {
        let identity = record.identity.clone();
        let uid = record.uid;
        let mut current = record;
        let mut conflicts = 0_u32;

        loop {
            let mut updated = current.clone();
            updated.status.external_id = Some(external_id.clone());

            match self.store.update(&updated).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.is_conflict() && conflicts < self.config.max_conflict_retries => {
                    conflicts = conflicts.saturating_add(1);
                    debug!(
                        identity = %identity,
                        external_id = %external_id,
                        conflicts,
                        "Conflict recording cluster id, re-reading"
                    );
                }
                Err(e) => {
                    return Err(Error::orphaned_cluster(&identity, external_id, e.to_string()));
                }
            }

            current = self.store.get(&identity).await.map_err(|e| {
                Error::orphaned_cluster(&identity, external_id, format!("re-read failed: {e}"))
            })?;
            if current.uid != uid {
                return Err(Error::orphaned_cluster(
                    &identity,
                    external_id,
                    "record was replaced",
                ));
            }
            match current.external_id() {
                Some(existing) if existing == external_id => return Ok(current),
                Some(existing) => {
                    return Err(Error::orphaned_cluster(
                        &identity,
                        external_id,
                        format!("record already references cluster {existing}"),
                    ));
                }
                None => {}
            }
        }
    }

    async fn refresh(&self, record: Record, external_id: ExternalId) -> Result<ReconcileResult> {
        let identity = record.identity.clone();
        // A cluster that cannot be fetched keeps its id; the record is never resubmitted.
        let snapshot = self.api.get(&external_id).await.map_err(|e| {
            if e.is_not_found() {
                warn!(identity = %identity, external_id = %external_id, "Cluster not found");
            }
            Error::cluster_api(&identity, ReconcileAction::Refresh, e)
        })?;

        let drifted = record.status.external_state.as_ref() != Some(&snapshot);
        let stored = if drifted {
            let mut updated = record;
            updated.status.external_state = Some(snapshot.clone());
            let stored = self
                .store
                .update(&updated)
                .await
                .map_err(|e| Error::persist(&identity, ReconcileAction::Refresh, e))?;
            info!(
                identity = %identity,
                external_id = %external_id,
                state = %snapshot.state,
                "Cluster state changed"
            );
            stored
        } else {
            record
        };

        Ok(ReconcileResult {
            identity,
            applied: Applied::Refreshed { snapshot, drifted },
            requeue: Requeue::After(self.config.requeue_after),
            record: Some(stored),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Get the record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn RecordStore>>,
    api: Option<Arc<dyn ClusterApi>>,
    events: Option<Arc<dyn EventSink>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            api: None,
            events: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the record store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cluster API.
    #[must_use]
    pub fn with_cluster_api(mut self, api: Arc<dyn ClusterApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Set the event sink. Defaults to the tracing sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the guard name.
    #[must_use]
    pub fn guard_name(mut self, name: impl Into<String>) -> Self {
        self.config.guard_name = name.into();
        self
    }

    /// Set the requeue delay.
    #[must_use]
    pub fn requeue_after(mut self, delay: Duration) -> Self {
        self.config.requeue_after = delay;
        self
    }

    /// Set the conflict retry bound.
    #[must_use]
    pub fn max_conflict_retries(mut self, retries: u32) -> Self {
        self.config.max_conflict_retries = retries;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the store or API is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Record store is required"))?;
        let api = self
            .api
            .ok_or_else(|| Error::invalid_config("Cluster API is required"))?;
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink));

        Reconciler::new(store, api, events, self.config)
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
