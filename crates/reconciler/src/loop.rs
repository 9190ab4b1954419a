//! Continuous reconciliation loop.
//!
//! Workers pull identities from a [`WorkQueue`] and run the reconciler on
//! them. Successful runs are re-queued after the delay the reconciler asked
//! for; failed runs back off per identity. A resync ticker queues every
//! known identity at a fixed interval so a missed notification cannot strand
//! a record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dcluster_core::Identity;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::policy::BackoffPolicy;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Interval between full sweeps over all records.
    pub resync_interval: Duration,
    /// Backoff for failed reconciles.
    pub backoff: BackoffPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LoopConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for zero workers, a zero resync
    /// interval, a base delay above the max delay, or jitter outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync interval must be positive"));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(Error::invalid_config(
                "backoff base delay must not exceed max delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(Error::invalid_config("jitter factor must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Counters for a running loop.
#[derive(Debug, Default)]
pub struct LoopStats {
    reconciled: AtomicU64,
    failed: AtomicU64,
}

impl LoopStats {
    /// Successful invocations so far.
    pub fn reconciled(&self) -> u64 {
        self.reconciled.load(Ordering::Relaxed)
    }

    /// Failed invocations so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Continuous reconciliation loop.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue<Identity>>,
    config: LoopConfig,
    failures: Mutex<HashMap<Identity, u32>>,
    stats: LoopStats,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid.
    pub fn new(reconciler: Arc<Reconciler>, config: LoopConfig) -> Result<Self> {
        config.validate()?;
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            config,
            failures: Mutex::new(HashMap::new()),
            stats: LoopStats::default(),
            stop_tx,
        })
    }

    /// Queue an identity for reconciliation.
    pub fn enqueue(&self, identity: Identity) {
        self.queue.add(identity);
    }

    /// Queue every identity the store knows about.
    pub async fn resync(&self) {
        match self.reconciler.store().list().await {
            Ok(identities) => {
                debug!(count = identities.len(), "Resync");
                identities.into_iter().for_each(|id| self.queue.add(id));
            }
            Err(e) => warn!(error = %e, "Resync failed to list records"),
        }
    }

    /// Run until stopped.
    ///
    /// Spawns the workers and the resync ticker; the first sweep happens
    /// immediately. Returns once stopped and every in-flight reconcile has
    /// finished.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let workers: Vec<_> = (0..self.config.workers)
            .map(|worker| {
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.work(worker).await })
            })
            .collect();

        let mut stop_rx = self.stop_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.resync_interval);
        while !*stop_rx.borrow() {
            tokio::select! {
                _ = ticker.tick() => self.resync().await,
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.queue.shutdown();
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        info!(
            reconciled = self.stats.reconciled(),
            failed = self.stats.failed(),
            "Reconciliation loop stopped"
        );
        Ok(())
    }

    async fn work(&self, worker: usize) {
        debug!(worker, "Worker started");
        while let Some(identity) = self.queue.next().await {
            self.process(&identity).await;
            self.queue.done(&identity);
        }
        debug!(worker, "Worker stopped");
    }

    async fn process(&self, identity: &Identity) {
        match self.reconciler.reconcile(identity).await {
            Ok(result) => {
                self.stats.reconciled.fetch_add(1, Ordering::Relaxed);
                self.reset_failures(identity);
                if let Some(delay) = result.requeue.delay() {
                    self.queue.add_after(identity.clone(), delay);
                }
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                let failures = self.record_failure(identity);
                let delay = self.config.backoff.delay_for(failures, e.class());
                debug!(
                    identity = %identity,
                    failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Backing off"
                );
                self.queue.add_after(identity.clone(), delay);
            }
        }
    }

    fn record_failure(&self, identity: &Identity) -> u32 {
        let Ok(mut failures) = self.failures.lock() else {
            return 1;
        };
        let count = failures.entry(identity.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn reset_failures(&self, identity: &Identity) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(identity);
        }
    }

    /// Consecutive failures recorded for an identity.
    pub fn failures(&self, identity: &Identity) -> u32 {
        self.failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(identity).copied())
            .unwrap_or(0)
    }

    /// Counters.
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop. In-flight reconciles finish; nothing new starts.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_api::{ApiOperation, ClusterApiError, InMemoryClusterApi};
    use crate::reconciler::ReconcilerBuilder;
    use crate::store::{InMemoryRecordStore, RecordStore};
    use dcluster_core::{ClusterSpec, Record};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn reconciler(
        store: Arc<InMemoryRecordStore>,
        api: Arc<InMemoryClusterApi>,
    ) -> Result<Arc<Reconciler>> {
        Ok(Arc::new(
            ReconcilerBuilder::new()
                .with_store(store)
                .with_cluster_api(api)
                .requeue_after(Duration::from_millis(20))
                .build()?,
        ))
    }

    fn fast_config() -> LoopConfig {
        LoopConfig {
            workers: 2,
            resync_interval: Duration::from_millis(50),
            backoff: BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20)),
        }
    }

    /// Given records in the store
    /// When the loop runs for a while
    /// Then each record reaches the submitted state
    #[tokio::test]
    async fn loop_drives_records_to_submitted() -> TestResult {
        let store = InMemoryRecordStore::new_arc();
        let api = Arc::new(InMemoryClusterApi::new());
        for name in ["etl", "ml"] {
            store
                .create(Record::new(
                    Identity::new("analytics", name)?,
                    ClusterSpec::new(name, "13.3.x", "Standard_D3_v2"),
                ))
                .await?;
        }

        let runner = Arc::new(ReconciliationLoop::new(
            reconciler(store.clone(), api.clone())?,
            fast_config(),
        )?);
        let stopper = runner.stopper();
        let handle = tokio::spawn(Arc::clone(&runner).run());

        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.stop();
        tokio::time::timeout(Duration::from_secs(2), handle).await???;

        for id in store.list().await? {
            let record = store.get(&id).await?;
            assert!(record.external_id().is_some(), "{id} not submitted");
            assert!(record.status.external_state.is_some(), "{id} not refreshed");
        }
        assert_eq!(api.create_count(), 2);
        assert!(runner.stats().reconciled() >= 6);
        Ok(())
    }

    /// Given a create that keeps failing
    /// When the loop processes the record
    /// Then failures are counted and the record is retried
    #[tokio::test]
    async fn failing_record_is_retried_with_backoff() -> TestResult {
        let store = InMemoryRecordStore::new_arc();
        let api = Arc::new(InMemoryClusterApi::new());
        for _ in 0..3 {
            api.fail_next(ApiOperation::Create, ClusterApiError::transient("throttled"));
        }
        let identity = Identity::new("analytics", "etl")?;
        store
            .create(Record::new(
                identity.clone(),
                ClusterSpec::new("etl", "13.3.x", "Standard_D3_v2"),
            ))
            .await?;

        let runner = Arc::new(ReconciliationLoop::new(
            reconciler(store.clone(), api.clone())?,
            fast_config(),
        )?);
        let stopper = runner.stopper();
        let handle = tokio::spawn(Arc::clone(&runner).run());

        tokio::time::sleep(Duration::from_millis(400)).await;
        stopper.stop();
        tokio::time::timeout(Duration::from_secs(2), handle).await???;

        assert!(runner.stats().failed() >= 3);
        assert!(store.get(&identity).await?.external_id().is_some());
        assert_eq!(runner.failures(&identity), 0);
        Ok(())
    }

    /// Given a submitted record with a requeue delay shorter than the resync interval
    /// When the loop runs across many resync periods
    /// Then the record is refreshed at a steady rate instead of an ever growing one
    #[tokio::test(start_paused = true)]
    async fn requeue_and_resync_do_not_compound() -> TestResult {
        let store = InMemoryRecordStore::new_arc();
        let api = Arc::new(InMemoryClusterApi::new());
        store
            .create(Record::new(
                Identity::new("analytics", "etl")?,
                ClusterSpec::new("etl", "13.3.x", "Standard_D3_v2"),
            ))
            .await?;

        let reconciler = Arc::new(
            ReconcilerBuilder::new()
                .with_store(store)
                .with_cluster_api(api.clone())
                .requeue_after(Duration::from_millis(100))
                .build()?,
        );
        let config = LoopConfig {
            resync_interval: Duration::from_millis(130),
            ..fast_config()
        };
        let runner = Arc::new(ReconciliationLoop::new(reconciler, config)?);
        let stopper = runner.stopper();
        let handle = tokio::spawn(Arc::clone(&runner).run());

        // Warm up: guard, submit, first refresh.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut per_second = Vec::new();
        for _ in 0..6 {
            let before = api.count(ApiOperation::Get);
            tokio::time::sleep(Duration::from_secs(1)).await;
            per_second.push(api.count(ApiOperation::Get).saturating_sub(before));
        }
        stopper.stop();
        tokio::time::timeout(Duration::from_secs(2), handle).await???;

        // At most one requeue every 100ms plus one resync every 130ms.
        for gets in &per_second {
            assert!((8..=20).contains(gets), "refresh rate drifted: {per_second:?}");
        }
        Ok(())
    }

    /// Given a loop that is running
    /// When stop() is called
    /// Then the loop should exit gracefully
    #[tokio::test]
    async fn stop_signal_terminates_loop() -> TestResult {
        let store = InMemoryRecordStore::new_arc();
        let api = Arc::new(InMemoryClusterApi::new());
        let runner = Arc::new(ReconciliationLoop::new(
            reconciler(store, api)?,
            LoopConfig::default(),
        )?);
        let handle = tokio::spawn(Arc::clone(&runner).run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))), "Loop should stop within timeout");
        Ok(())
    }

    #[test]
    fn config_validation() {
        assert!(LoopConfig::default().validate().is_ok());
        assert!(LoopConfig {
            workers: 0,
            ..LoopConfig::default()
        }
        .validate()
        .is_err());
        assert!(LoopConfig {
            backoff: BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(1)),
            ..LoopConfig::default()
        }
        .validate()
        .is_err());
        assert!(LoopConfig {
            backoff: BackoffPolicy::default().with_jitter(1.5),
            ..LoopConfig::default()
        }
        .validate()
        .is_err());
    }
}
