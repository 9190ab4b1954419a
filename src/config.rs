//! Operator configuration: file loading, environment overrides, validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dcluster_api::ApiConfig;
use dcluster_reconciler::{BackoffPolicy, LoopConfig, ReconcilerConfig, DEFAULT_GUARD_NAME};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable overriding `api.host`.
pub const ENV_API_HOST: &str = "DCLUSTER_API_HOST";
/// Environment variable overriding `dispatcher.workers`.
pub const ENV_WORKERS: &str = "DCLUSTER_WORKERS";
/// Environment variable overriding `reconciler.requeue_after_secs`.
pub const ENV_REQUEUE_AFTER_SECS: &str = "DCLUSTER_REQUEUE_AFTER_SECS";

/// Errors raised while assembling the operator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value for {name}: {value:?}")]
    InvalidOverride { name: &'static str, value: String },

    #[error(transparent)]
    Api(#[from] dcluster_api::Error),

    #[error(transparent)]
    Reconciler(#[from] dcluster_reconciler::Error),
}

/// Top-level operator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub api: ApiConfig,
    pub reconciler: ReconcilerSection,
    pub dispatcher: DispatcherSection,
}

/// `[reconciler]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub guard_name: String,
    pub requeue_after_secs: u64,
    pub max_conflict_retries: u32,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            guard_name: DEFAULT_GUARD_NAME.to_string(),
            requeue_after_secs: 30,
            max_conflict_retries: 5,
        }
    }
}

/// `[dispatcher]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub workers: usize,
    pub resync_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_factor: f64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval_secs: 300,
            backoff_base_ms: 500,
            backoff_max_ms: 300_000,
            jitter_factor: 0.1,
        }
    }
}

impl OperatorConfig {
    /// Load from a file. JSON by extension, TOML otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Load `path` if given, otherwise `default_path` when it exists, otherwise defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when an explicitly named file cannot be loaded.
    pub fn load(path: Option<&Path>, default_path: &Path) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None if default_path.exists() => Self::from_file(default_path),
            None => Ok(Self::default()),
        }
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOverride` for unparsable values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOverride` for unparsable values.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_API_HOST) {
            let host = Url::parse(&value).map_err(|_| ConfigError::InvalidOverride {
                name: ENV_API_HOST,
                value: value.clone(),
            })?;
            self.api.host = Some(host);
        }
        if let Some(value) = lookup(ENV_WORKERS) {
            self.dispatcher.workers = parse_override(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_REQUEUE_AFTER_SECS) {
            self.reconciler.requeue_after_secs = parse_override(ENV_REQUEUE_AFTER_SECS, &value)?;
        }
        Ok(())
    }

    /// Reconciler settings.
    pub fn to_reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            guard_name: self.reconciler.guard_name.clone(),
            requeue_after: Duration::from_secs(self.reconciler.requeue_after_secs),
            max_conflict_retries: self.reconciler.max_conflict_retries,
        }
    }

    /// Dispatcher settings.
    pub fn to_loop_config(&self) -> LoopConfig {
        let dispatcher = &self.dispatcher;
        LoopConfig {
            workers: dispatcher.workers,
            resync_interval: Duration::from_secs(dispatcher.resync_interval_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(dispatcher.backoff_base_ms),
                Duration::from_millis(dispatcher.backoff_max_ms),
            )
            .with_jitter(dispatcher.jitter_factor),
        }
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.to_reconciler_config().validate()?;
        self.to_loop_config().validate()?;
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            name,
            value: value.to_string(),
        })
}
