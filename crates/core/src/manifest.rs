//! Typed decoding of record manifests.
//!
//! A manifest is a YAML or JSON list of `{namespace, name, spec}` entries.
//! Decoding happens once at the boundary; everything downstream works with
//! [`Record`] values.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::record::{ClusterSpec, Record};
use crate::types::Identity;

/// One entry in a manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub namespace: String,
    pub name: String,
    pub spec: ClusterSpec,
}

impl ManifestEntry {
    /// Validate the entry and turn it into a fresh record.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity or the spec is invalid.
    pub fn into_record(self) -> Result<Record> {
        let identity = Identity::new(self.namespace, self.name)?;
        validate_spec(&self.spec)?;
        Ok(Record::new(identity, self.spec))
    }
}

/// Minimal structural checks; the cluster API remains the authority on
/// everything else.
fn validate_spec(spec: &ClusterSpec) -> Result<()> {
    if spec.cluster_name.trim().is_empty() {
        return Err(Error::invalid_record("spec.cluster_name must not be empty"));
    }
    if spec.spark_version.trim().is_empty() {
        return Err(Error::invalid_record("spec.spark_version must not be empty"));
    }
    if let Some(autoscale) = spec.autoscale {
        if autoscale.min_workers > autoscale.max_workers {
            return Err(Error::invalid_record(format!(
                "autoscale.min_workers ({}) exceeds autoscale.max_workers ({})",
                autoscale.min_workers, autoscale.max_workers
            )));
        }
    }
    Ok(())
}

/// Manifest encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Yaml,
    Json,
}

impl ManifestFormat {
    /// Pick a format from a file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        if path.extension().is_some_and(|e| e == "json") {
            Self::Json
        } else {
            Self::Yaml
        }
    }
}

/// Decode manifest text into records.
///
/// # Errors
///
/// Returns a parse error for malformed input, a validation error for bad
/// entries, and `Error::DuplicateRecord` if an identity appears twice.
pub fn parse_manifest(content: &str, format: ManifestFormat) -> Result<Vec<Record>> {
    let entries: Vec<ManifestEntry> = match format {
        ManifestFormat::Json => {
            serde_json::from_str(content).map_err(|e| Error::json_parse_failed(e.to_string()))?
        }
        ManifestFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| Error::yaml_parse_failed(e.to_string()))?
        }
    };

    let mut seen = HashSet::new();
    entries
        .into_iter()
        .map(|entry| {
            let record = entry.into_record()?;
            if seen.insert(record.identity.clone()) {
                Ok(record)
            } else {
                Err(Error::DuplicateRecord {
                    identity: record.identity.to_string(),
                })
            }
        })
        .collect()
}

/// Read and decode a manifest file.
///
/// # Errors
///
/// Returns `Error::FileReadFailed` if the file cannot be read, otherwise
/// whatever [`parse_manifest`] returns.
pub fn load_manifest(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    let records = parse_manifest(&content, ManifestFormat::from_path(path))?;
    tracing::debug!(path = %path.display(), records = records.len(), "Loaded manifest");
    Ok(records)
}
