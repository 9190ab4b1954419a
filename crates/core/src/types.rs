//! Identifier types shared across the workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;

/// Stable `(namespace, name)` key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    namespace: String,
    name: String,
}

impl Identity {
    /// Create an identity, validating both segments.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidIdentity` when a segment is empty, too long,
    /// or contains characters outside `[a-z0-9-.]`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> crate::Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        validate_segment(&namespace)?;
        validate_segment(&name)?;
        Ok(Self { namespace, name })
    }

    /// Namespace segment.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name segment.
    pub fn name(&self) -> &str {
        &self.name
    }
}

const MAX_SEGMENT_LEN: usize = 253;

fn validate_segment(value: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_identity(value, "must not be empty"));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(Error::invalid_identity(
            value,
            format!("longer than {MAX_SEGMENT_LEN} characters"),
        ));
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
    if !valid {
        return Err(Error::invalid_identity(
            value,
            "only lowercase alphanumerics, '-' and '.' are allowed",
        ));
    }
    Ok(())
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Err(Error::invalid_identity(s, "expected '<namespace>/<name>'")),
        }
    }
}

/// Store-assigned id of one incarnation of a record.
///
/// Two records created under the same identity at different times have
/// different uids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordUid(Ulid);

impl RecordUid {
    /// Create a new random uid.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Create from a ULID.
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Get the inner ULID.
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for RecordUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::invalid_record(format!("invalid uid {s:?}: {e}")))
    }
}

/// Optimistic-concurrency token of a stored record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// Wrap a raw version number.
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// The version that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw version number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a cluster in the external management API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(String);

impl ExternalId {
    /// Wrap an external cluster id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
