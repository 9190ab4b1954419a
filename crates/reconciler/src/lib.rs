//! K8s-style reconciliation engine for externally managed analytics clusters.
//!
//! Each record declares a cluster that lives in an external management API.
//! The [`Reconciler`] looks at one record at a time and takes at most one
//! idempotent step toward the declared state:
//!
//! - **Deleting**: tear down the external cluster, then release the guard
//! - **Unguarded**: attach the deletion guard
//! - **Unsubmitted**: create the cluster and record its id
//! - **Submitted**: refresh the observed cluster status
//!
//! The step is chosen from a [`ReconcileState`] derived fresh from the
//! store on every invocation, so duplicate, delayed and out-of-order
//! deliveries all converge.
//!
//! # Key Concepts
//!
//! ## Guard before create
//!
//! The guard is persisted in its own invocation before any create is issued,
//! and it is released only after teardown is confirmed. The store cannot
//! physically remove a guarded record, so deleting a record never orphans
//! its cluster.
//!
//! ## Idempotent create
//!
//! Creates carry an [`IdempotencyKey`] derived from the record identity and
//! uid. A create that succeeded remotely but was not recorded locally is
//! picked back up on retry instead of producing a second cluster.
//!
//! ## Dispatch
//!
//! [`ReconciliationLoop`] feeds identities from a deduplicating
//! [`WorkQueue`] to a pool of workers, requeues on success, backs off on
//! failure and sweeps every record on a fixed interval.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dcluster_reconciler::{
//!     InMemoryClusterApi, InMemoryRecordStore, LoopConfig, ReconcilerBuilder,
//!     ReconciliationLoop,
//! };
//!
//! #[tokio::main]
//! async fn main() -> dcluster_reconciler::Result<()> {
//!     let store = InMemoryRecordStore::new_arc();
//!     let reconciler = Arc::new(
//!         ReconcilerBuilder::new()
//!             .with_store(store)
//!             .with_cluster_api(Arc::new(InMemoryClusterApi::new()))
//!             .build()?,
//!     );
//!
//!     let runner = Arc::new(ReconciliationLoop::new(reconciler, LoopConfig::default())?);
//!     let stopper = runner.stopper();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         stopper.stop();
//!     });
//!     runner.run().await
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cluster_api;
pub mod error;
pub mod guard;
pub mod idempotency;
pub mod r#loop;
pub mod policy;
pub mod queue;
pub mod reconciler;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types
pub use cluster_api::{
    ApiCall, ApiOperation, ApiResult, ClusterApi, ClusterApiError, InMemoryClusterApi,
};
pub use error::{Error, ErrorClass, Result};
pub use guard::GuardManager;
pub use idempotency::IdempotencyKey;
pub use policy::BackoffPolicy;
pub use queue::WorkQueue;
pub use r#loop::{LoopConfig, LoopStats, LoopStopper, ReconciliationLoop};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig, DEFAULT_GUARD_NAME};
pub use state::ReconcileState;
pub use store::{InMemoryRecordStore, RecordStore, StoreError, StoreResult};
pub use types::{Applied, ReconcileAction, ReconcileResult, Requeue};
