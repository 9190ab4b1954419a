//! Deterministic idempotency keys for cluster creation.
//!
//! The key for a record is derived in two steps:
//!
//! ```text
//! namespace = UUID v5(DNS_NAMESPACE, "<namespace>/<name>")
//! key       = UUID v5(namespace, uid)
//! ```
//!
//! Every retry of a create for the same record incarnation therefore carries
//! the same key, and the cluster API returns the cluster it already created
//! instead of making a second one. A record deleted and re-created under the
//! same identity gets a new uid and so a new key.

use std::fmt;
use std::str::FromStr;

use dcluster_core::{Identity, Record, RecordUid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Idempotency token passed to `ClusterApi::create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// Key for an identity and uid.
    pub fn new(identity: &Identity, uid: RecordUid) -> Self {
        let namespace = namespace_for(identity);
        Self(Uuid::new_v5(&namespace, uid.to_string().as_bytes()))
    }

    /// Key for a record's current incarnation.
    pub fn for_record(record: &Record) -> Self {
        Self::new(&record.identity, record.uid)
    }

    /// The underlying UUID.
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

fn namespace_for(identity: &Identity) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, identity.to_string().as_bytes())
}
