//! Reconcile outcome events for the dcluster operator.
//!
//! Every reconcile invocation ends with exactly one event describing what it
//! did (guard added, submitted, teardown complete, refreshed) or why it
//! failed. Events go to an [`EventSink`], which is fire-and-forget: a sink
//! that cannot deliver drops the event rather than failing the reconcile.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use dcluster_core::Identity;
//! use dcluster_events::{EventSink, FanoutSink, InMemoryEventSink, ReconcileEvent, TracingEventSink};
//!
//! let recorded = InMemoryEventSink::new_arc();
//! let sink = FanoutSink::new()
//!     .with_sink(Arc::new(TracingEventSink))
//!     .with_sink(recorded.clone());
//!
//! let identity = Identity::new("analytics", "etl").unwrap();
//! sink.emit(ReconcileEvent::guard_added(identity));
//! assert_eq!(recorded.reasons(), vec!["Added"]);
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod event;
pub mod sink;

// Re-export main types
pub use event::{EventId, EventKind, EventType, ReconcileEvent};
pub use sink::{EventSink, FanoutSink, InMemoryEventSink, TracingEventSink};
