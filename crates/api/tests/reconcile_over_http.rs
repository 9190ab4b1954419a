//! Reconciler driven against a mocked Databricks workspace.

use std::sync::Arc;
use std::time::Duration;

use dcluster_api::{ApiConfig, HttpClusterApi};
use dcluster_core::{ClusterSpec, ExternalId, ExternalState, Identity, Record};
use dcluster_events::InMemoryEventSink;
use dcluster_reconciler::{
    Applied, IdempotencyKey, InMemoryRecordStore, Reconciler, ReconcilerBuilder, RecordStore,
};
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Workspace {
    server: MockServer,
    store: Arc<InMemoryRecordStore>,
    events: Arc<InMemoryEventSink>,
    reconciler: Reconciler,
    identity: Identity,
}

impl Workspace {
    async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        let config = ApiConfig::with_host(Url::parse(&server.uri())?)
            .timeout(Duration::from_secs(2))
            .retry_base_delay(Duration::from_millis(5));
        let api = HttpClusterApi::new(config, "dapi-test")?;

        let store = InMemoryRecordStore::new_arc();
        let events = InMemoryEventSink::new_arc();
        let reconciler = ReconcilerBuilder::new()
            .with_store(store.clone())
            .with_cluster_api(Arc::new(api))
            .with_event_sink(events.clone())
            .build()?;

        let identity = Identity::new("analytics", "etl")?;
        store
            .create(Record::new(
                identity.clone(),
                ClusterSpec::new("etl", "13.3.x-scala2.12", "Standard_D3_v2").with_num_workers(2),
            ))
            .await?;

        Ok(Self {
            server,
            store,
            events,
            reconciler,
            identity,
        })
    }

    async fn reconcile(&self) -> Result<Applied, Box<dyn std::error::Error>> {
        Ok(self.reconciler.reconcile(&self.identity).await?.applied)
    }
}

#[tokio::test]
async fn full_lifecycle_against_workspace() -> TestResult {
    let ws = Workspace::start().await?;
    let record = ws.store.get(&ws.identity).await?;
    let key = IdempotencyKey::for_record(&record);

    Mock::given(method("POST"))
        .and(path("/api/2.0/clusters/create"))
        .and(body_partial_json(serde_json::json!({
            "cluster_name": "etl",
            "idempotency_token": key.to_string(),
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "cluster_id": "0101-etl" })),
        )
        .expect(1)
        .mount(&ws.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/clusters/get"))
        .and(query_param("cluster_id", "0101-etl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cluster_id": "0101-etl",
            "state": "RUNNING",
            "num_workers": 2,
        })))
        .mount(&ws.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/clusters/permanent-delete"))
        .and(body_partial_json(serde_json::json!({ "cluster_id": "0101-etl" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&ws.server)
        .await;

    assert_eq!(ws.reconcile().await?, Applied::GuardAttached);

    let id = ExternalId::new("0101-etl");
    assert_eq!(
        ws.reconcile().await?,
        Applied::Submitted {
            external_id: id.clone(),
            deduplicated: false,
        }
    );

    assert!(matches!(
        ws.reconcile().await?,
        Applied::Refreshed { ref snapshot, drifted: true } if snapshot.state == ExternalState::Running
    ));
    let record = ws.store.get(&ws.identity).await?;
    assert_eq!(
        record
            .status
            .external_state
            .as_ref()
            .and_then(|s| s.num_workers),
        Some(2)
    );

    // A second refresh with the same answer writes nothing.
    let version = record.resource_version;
    assert!(matches!(
        ws.reconcile().await?,
        Applied::Refreshed { drifted: false, .. }
    ));
    assert_eq!(ws.store.get(&ws.identity).await?.resource_version, version);

    ws.store.delete(&ws.identity).await?;
    assert_eq!(
        ws.reconcile().await?,
        Applied::TornDown {
            external_id: Some(id),
        }
    );
    assert!(!ws.store.contains(&ws.identity).await);
    assert_eq!(ws.reconcile().await?, Applied::Nothing);

    assert_eq!(
        ws.events.reasons(),
        vec!["Added", "Submitted", "Refreshed", "Refreshed", "Deleted"]
    );
    Ok(())
}

#[tokio::test]
async fn rejected_spec_leaves_record_unsubmitted() -> TestResult {
    let ws = Workspace::start().await?;

    Mock::given(method("POST"))
        .and(path("/api/2.0/clusters/create"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error_code": "INVALID_PARAMETER_VALUE",
            "message": "Unknown spark_version",
        })))
        .expect(1)
        .mount(&ws.server)
        .await;

    assert_eq!(ws.reconcile().await?, Applied::GuardAttached);
    let err = ws
        .reconciler
        .reconcile(&ws.identity)
        .await
        .err()
        .ok_or("create should have failed")?;
    assert!(!err.is_retryable());

    let record = ws.store.get(&ws.identity).await?;
    assert!(!record.is_submitted());
    assert_eq!(ws.events.reasons(), vec!["Added", "Failed"]);
    Ok(())
}

#[tokio::test]
async fn cluster_deleted_out_of_band_is_released_on_teardown() -> TestResult {
    let ws = Workspace::start().await?;

    Mock::given(method("POST"))
        .and(path("/api/2.0/clusters/create"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "cluster_id": "0101-etl" })),
        )
        .mount(&ws.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/clusters/permanent-delete"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error_code": "RESOURCE_DOES_NOT_EXIST",
            "message": "Cluster 0101-etl does not exist",
        })))
        .expect(1)
        .mount(&ws.server)
        .await;

    ws.reconcile().await?;
    ws.reconcile().await?;
    ws.store.delete(&ws.identity).await?;

    assert!(matches!(ws.reconcile().await?, Applied::TornDown { .. }));
    assert!(!ws.store.contains(&ws.identity).await);
    Ok(())
}
