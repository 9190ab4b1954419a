//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "dcluster.toml";

/// dcluster - lifecycle operator for Databricks clusters
#[derive(Parser, Debug)]
#[command(name = "dcluster")]
#[command(version)]
#[command(about = "Keeps Databricks clusters in line with declared records")]
#[command(
    long_about = "dcluster reconciles declarative cluster records against a Databricks workspace: it creates clusters for new records, reports their state, and tears them down when the records are deleted."
)]
pub struct Cli {
    /// Config file (TOML, or JSON by extension)
    #[arg(short, long, global = true, env = "DCLUSTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the records in a manifest until interrupted
    Run {
        /// Manifest of records (YAML, or JSON by extension)
        #[arg(short, long)]
        manifest: PathBuf,

        /// On Ctrl+C, delete every record and wait for its cluster to be torn down
        #[arg(long, default_value_t = false)]
        teardown_on_exit: bool,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Print the idempotency key used when creating a record's cluster
    RenderKey {
        /// Record identity as <namespace>/<name>
        identity: String,

        /// Record uid (ULID)
        uid: String,
    },
}
