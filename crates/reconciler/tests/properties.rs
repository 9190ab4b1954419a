//! Property tests over random sequences of deliveries, deletions and faults.

use std::collections::BTreeSet;
use std::sync::Arc;

use dcluster_core::{ClusterSpec, ExternalId, Identity, Record};
use dcluster_events::InMemoryEventSink;
use dcluster_reconciler::{
    ApiOperation, ClusterApiError, InMemoryClusterApi, InMemoryRecordStore, ReconcilerBuilder,
    RecordStore,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

const GUARD: &str = "dcluster.test";

#[derive(Debug, Clone, Copy)]
enum Step {
    Reconcile,
    RequestDeletion,
    FailCreate,
    FailGet,
    FailDelete,
    FailStoreWrite,
    Conflict,
    ClusterVanishes,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => Just(Step::Reconcile),
        1 => Just(Step::RequestDeletion),
        1 => Just(Step::FailCreate),
        1 => Just(Step::FailGet),
        1 => Just(Step::FailDelete),
        1 => Just(Step::FailStoreWrite),
        1 => Just(Step::Conflict),
        1 => Just(Step::ClusterVanishes),
    ]
}

/// What the record looked like before one reconcile.
struct Before {
    record: Option<Record>,
    creates: usize,
}

fn check_step(
    before: &Before,
    after: Option<&Record>,
    api: &InMemoryClusterApi,
) -> Result<(), String> {
    let creates = api.create_count();
    let created = creates > before.creates;

    if created {
        let record = before.record.as_ref().ok_or("create for an absent record")?;
        if !record.has_finalizer(GUARD) {
            return Err("create issued before the guard was recorded".into());
        }
        if record.is_being_deleted() {
            return Err("create issued for a record being deleted".into());
        }
        if record.is_submitted() {
            return Err("create issued although an id was recorded".into());
        }
    }

    if let Some(record) = &before.record {
        if let Some(id) = record.external_id() {
            let guard_gone = after.is_none_or(|r| !r.has_finalizer(GUARD));
            if record.has_finalizer(GUARD) && guard_gone && api.contains(id) {
                return Err(format!("guard released while cluster {id} still exists"));
            }
            if after.is_some_and(|r| r.external_id() != Some(id)) {
                return Err(format!("recorded id {id} was changed or cleared"));
            }
        }
    }

    if api.cluster_count() > 1 {
        return Err("more than one cluster exists for one record".into());
    }
    Ok(())
}

async fn run(steps: Vec<Step>) -> Result<(), String> {
    let store = Arc::new(InMemoryRecordStore::new().recording_history());
    let api = Arc::new(InMemoryClusterApi::new());
    let reconciler = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_cluster_api(api.clone())
        .with_event_sink(InMemoryEventSink::new_arc())
        .guard_name(GUARD)
        .build()
        .map_err(|e| e.to_string())?;

    let identity = Identity::new("analytics", "etl").map_err(|e| e.to_string())?;
    store
        .create(Record::new(
            identity.clone(),
            ClusterSpec::new("etl", "13.3.x", "Standard_D3_v2"),
        ))
        .await
        .map_err(|e| e.to_string())?;

    // Faults are only injected for the next reconcile, then cleared by the
    // drain below.
    let drain = std::iter::repeat_n(Step::Reconcile, 8);
    for step in steps.into_iter().chain(drain) {
        let current = store.get(&identity).await.ok();
        match step {
            Step::Reconcile => {
                let before = Before {
                    record: current,
                    creates: api.create_count(),
                };
                // Errors are expected under injected faults.
                let _ = reconciler.reconcile(&identity).await;
                let after = store.get(&identity).await.ok();
                check_step(&before, after.as_ref(), &api)?;
            }
            Step::RequestDeletion => {
                let _ = store.delete(&identity).await;
            }
            Step::FailCreate => {
                api.fail_next(ApiOperation::Create, ClusterApiError::transient("throttled"));
            }
            Step::FailGet => {
                api.fail_next(ApiOperation::Get, ClusterApiError::transient("timeout"));
            }
            Step::FailDelete => {
                api.fail_next(ApiOperation::Delete, ClusterApiError::transient("503"));
            }
            Step::FailStoreWrite => store.fail_next_updates(1).await,
            Step::Conflict => store.inject_conflicts(1).await,
            Step::ClusterVanishes => {
                if let Some(id) = current.as_ref().and_then(Record::external_id) {
                    api.remove_cluster(id);
                }
            }
        }
    }

    // Every id that was ever recorded belongs to one cluster, and once the
    // record is gone so is that cluster.
    let recorded: BTreeSet<ExternalId> = store
        .history(&identity)
        .await
        .iter()
        .filter_map(|r| r.external_id().cloned())
        .collect();
    if recorded.len() > 1 {
        return Err(format!("record referenced several clusters: {recorded:?}"));
    }
    if !store.contains(&identity).await {
        if let Some(id) = recorded.iter().find(|id| api.contains(id)) {
            return Err(format!("record removed but cluster {id} survived"));
        }
    }
    Ok(())
}

fn run_blocking(steps: Vec<Step>) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    runtime.block_on(run(steps)).map_err(TestCaseError::fail)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn lifecycle_invariants_hold(steps in proptest::collection::vec(step(), 1..40)) {
        run_blocking(steps)?;
    }
}

#[test]
fn deletion_requested_before_first_delivery() -> Result<(), TestCaseError> {
    run_blocking(vec![Step::RequestDeletion, Step::Reconcile])
}

#[test]
fn orphaned_create_then_deletion() -> Result<(), TestCaseError> {
    run_blocking(vec![
        Step::Reconcile,
        Step::FailStoreWrite,
        Step::Reconcile,
        Step::Reconcile,
        Step::RequestDeletion,
        Step::Reconcile,
    ])
}

#[test]
fn store_list_sees_the_record() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let store = InMemoryRecordStore::new();
        let identity = Identity::new("analytics", "etl")?;
        store
            .create(Record::new(
                identity.clone(),
                ClusterSpec::new("etl", "13.3.x", "Standard_D3_v2"),
            ))
            .await?;
        assert_eq!(store.list().await?, vec![identity]);
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
