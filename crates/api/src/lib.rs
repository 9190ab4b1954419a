//! Databricks Clusters API client for the dcluster operator.
//!
//! [`HttpClusterApi`] implements the reconciler's [`ClusterApi`] port over
//! the workspace REST API 2.0. Transport failures, throttling and server
//! errors are retried inside a single call; what remains is translated into
//! [`ClusterApiError`] so the reconciler can decide whether to back off or
//! give up.
//!
//! ```ignore
//! use dcluster_api::{ApiConfig, HttpClusterApi};
//!
//! let config = ApiConfig::with_host("https://adb-123.4.azuredatabricks.net".parse()?);
//! let api = HttpClusterApi::from_env(config)?;
//! ```
//!
//! [`ClusterApi`]: dcluster_reconciler::ClusterApi
//! [`ClusterApiError`]: dcluster_reconciler::ClusterApiError

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod client;
pub mod config;
pub mod error;
pub mod wire;

pub use client::HttpClusterApi;
pub use config::ApiConfig;
pub use error::{Error, Result};
