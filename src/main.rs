//! # dcluster - operator entry point
//!
//! ## Startup sequence
//!
//! 1. **Configuration** - load the config file, apply environment overrides, validate
//! 2. **Record store** - seed the in-memory store from the manifest
//! 3. **Cluster API** - build the HTTP client with the token from the environment
//! 4. **Reconciler** - wire store, client and the logging event sink
//! 5. **Reconciliation loop** - start the workers and forward store changes into the queue
//!
//! ## Shutdown
//!
//! Ctrl+C stops the loop; in-flight reconciles finish first. With
//! `--teardown-on-exit` every record is deleted and the operator waits for
//! the clusters to be torn down before stopping (a second Ctrl+C skips the wait).

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dcluster::{Cli, Commands, DEFAULT_CONFIG_PATH, OperatorConfig};
use dcluster_api::HttpClusterApi;
use dcluster_core::{Identity, RecordUid, load_manifest};
use dcluster_events::TracingEventSink;
use dcluster_reconciler::{
    IdempotencyKey, InMemoryRecordStore, ReconcilerBuilder, ReconciliationLoop, RecordStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            manifest,
            teardown_on_exit,
        } => run(config_path, &manifest, teardown_on_exit).await,
        Commands::CheckConfig => check_config(config_path),
        Commands::RenderKey { identity, uid } => render_key(&identity, &uid),
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<OperatorConfig> {
    let mut config = OperatorConfig::load(path, Path::new(DEFAULT_CONFIG_PATH))
        .context("Failed to load configuration")?;
    config
        .apply_env_overrides()
        .context("Failed to apply environment overrides")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config_path: Option<&Path>, manifest: &Path, teardown_on_exit: bool) -> Result<()> {
    let start_time = Instant::now();
    info!("dcluster starting...");

    let config = load_config(config_path)?;

    let store = init_store(manifest).await?;
    info!(records = store.len().await, "Record store initialized");

    let api = HttpClusterApi::from_env(config.api.clone())
        .context("Failed to initialize the cluster API client")?;
    info!(
        host = config.api.host.as_ref().map(url::Url::as_str).unwrap_or_default(),
        "Cluster API client initialized"
    );

    let reconciler = ReconcilerBuilder::new()
        .with_store(store.clone())
        .with_cluster_api(Arc::new(api))
        .with_event_sink(Arc::new(TracingEventSink))
        .with_config(config.to_reconciler_config())
        .build()
        .context("Failed to build the reconciler")?;

    let runner = Arc::new(
        ReconciliationLoop::new(Arc::new(reconciler), config.to_loop_config())
            .context("Failed to create the reconciliation loop")?,
    );
    let forwarder = spawn_change_forwarder(store.watch(), Arc::clone(&runner));
    let stopper = runner.stopper();
    let loop_handle = tokio::spawn(Arc::clone(&runner).run());

    info!("dcluster started in {:?}", start_time.elapsed());
    info!("dcluster is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    if teardown_on_exit {
        teardown_all(&store).await?;
    }

    stopper.stop();
    loop_handle
        .await
        .context("Reconciliation loop task failed")?
        .context("Reconciliation loop returned an error")?;
    forwarder.abort();

    info!("dcluster stopped gracefully");
    Ok(())
}

/// Seed the in-memory store from the manifest.
async fn init_store(manifest: &Path) -> Result<Arc<InMemoryRecordStore>> {
    let records = load_manifest(manifest)
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;

    let store = InMemoryRecordStore::new_arc();
    for record in records {
        let identity = record.identity.clone();
        store
            .create(record)
            .await
            .with_context(|| format!("Failed to register record {identity}"))?;
    }
    Ok(store)
}

/// Forward store changes into the work queue.
fn spawn_change_forwarder(
    mut changes: broadcast::Receiver<Identity>,
    runner: Arc<ReconciliationLoop>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(identity) => runner.enqueue(identity),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change feed lagged, resyncing");
                    runner.resync().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Request deletion of every record and wait until the store is empty.
async fn teardown_all(store: &Arc<InMemoryRecordStore>) -> Result<()> {
    let mut changes = store.watch();
    let identities = store
        .list()
        .await
        .context("Failed to list records for teardown")?;
    info!(records = identities.len(), "Tearing down all clusters");

    for identity in &identities {
        if let Err(e) = store.delete(identity).await {
            warn!(identity = %identity, error = %e, "Failed to request deletion");
        }
    }

    let drained = async {
        while !store.is_empty().await {
            match changes.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        () = drained => info!("All records removed"),
        () = wait_for_shutdown() => warn!(
            remaining = store.len().await,
            "Teardown interrupted, some clusters may still exist"
        ),
    }
    Ok(())
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

fn render_key(identity: &str, uid: &str) -> Result<()> {
    let identity: Identity = identity.parse().context("Invalid identity")?;
    let uid: RecordUid = uid.parse().context("Invalid uid")?;
    println!("{}", IdempotencyKey::new(&identity, uid));
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
