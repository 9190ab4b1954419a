//! Record model for the dcluster operator.
//!
//! A [`Record`] is the user-declared description of one externally managed
//! analytics cluster together with its observed status. This crate holds the
//! model and the typed manifest decoder; it performs no I/O beyond reading a
//! manifest file.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod manifest;
pub mod record;
pub mod types;

pub use error::{Error, Result};
pub use manifest::{load_manifest, parse_manifest, ManifestEntry, ManifestFormat};
pub use record::{Autoscale, ClusterSpec, ClusterStatus, ExternalState, Record, StatusSnapshot};
pub use types::{ExternalId, Identity, RecordUid, ResourceVersion};
