//! dcluster operator: CLI and configuration.
//!
//! The binary loads an [`OperatorConfig`], seeds an in-memory record store
//! from a manifest and drives it with the reconciliation loop against a
//! Databricks workspace.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod config;

pub use cli::{Cli, Commands, DEFAULT_CONFIG_PATH};
pub use config::{ConfigError, DispatcherSection, OperatorConfig, ReconcilerSection};
