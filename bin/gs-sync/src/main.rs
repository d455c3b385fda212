//! GateSync CLI
//!
//! Reconciles an API Gateway REST API against the endpoints declared in a
//! TOML file, keeping every control-plane call under one throttled queue.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync` | Reconcile, save state, deploy to the configured stage |
//! | `teardown` | Delete the REST API (best-effort) and clear state |
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATESYNC_CONFIG` | `gatesync.toml` | Configuration file |
//! | `GATESYNC_STATE` | `.gatesync/state.json` | State file |
//! | `GATESYNC_API_ID` | - | Overrides `[api] id` |
//! | `GATESYNC_API_NAME` | - | Overrides `[api] name` |
//! | `GATESYNC_STAGE` | - | Overrides `[api] stage` |
//! | `GATESYNC_REGION` | - | Overrides `[api] region` |
//! | `RUST_LOG` | `info` | Log level |

mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use gs_config::{ReconcileSettings, SyncConfig};
use gs_gateway::aws::{load_config, ApiGatewayClient, LambdaPermissionClient};
use gs_reconcile::{ReconcileError, Reconciler, ReconcilerConfig, ValidationContext};
use gs_scheduler::Scheduler;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::{FileStateStore, StateStore};

/// GateSync - REST API reconciler
#[derive(Parser, Debug)]
#[command(name = "gs-sync")]
#[command(about = "Reconcile an API Gateway REST API against declared endpoints")]
struct Args {
    /// Configuration file
    #[arg(long, short, env = "GATESYNC_CONFIG", default_value = "gatesync.toml", global = true)]
    config: PathBuf,

    /// State file recording the endpoints this tool owns
    #[arg(long, env = "GATESYNC_STATE", default_value = ".gatesync/state.json", global = true)]
    state: PathBuf,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the REST API against the configured endpoints
    Sync {
        /// Skip the deployment even if the config enables it
        #[arg(long)]
        no_deploy: bool,
    },
    /// Delete the REST API and forget the saved state
    Teardown,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn reconciler_config(settings: &ReconcileSettings) -> ReconcilerConfig {
    ReconcilerConfig {
        integration_conflict_cooldown: std::time::Duration::from_millis(settings.integration_conflict_cooldown_ms),
        integration_conflict_retries: settings.integration_conflict_retries,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    info!("Starting GateSync");

    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let store = FileStateStore::new(&args.state);

    let sdk_config = load_config(config.api.region.clone()).await;
    let region = sdk_config
        .region()
        .map(|r| r.to_string())
        .ok_or_else(|| anyhow!("No AWS region configured; set [api] region or GATESYNC_REGION"))?;

    let reconciler = Reconciler::new(
        Arc::new(ApiGatewayClient::from_conf(&sdk_config)),
        Arc::new(LambdaPermissionClient::from_conf(&sdk_config)),
        Scheduler::new(config.scheduler.to_scheduler_config()),
        reconciler_config(&config.reconcile),
    );
    info!(
        region = %region,
        interval_ms = config.scheduler.interval_ms,
        concurrency = config.scheduler.concurrency,
        "Control-plane clients initialized"
    );

    match args.command {
        Command::Sync { no_deploy } => {
            sync(&reconciler, &config, &store, &region, config.reconcile.deploy && !no_deploy).await
        }
        Command::Teardown => teardown(&reconciler, &config, &store).await,
    }
}

async fn sync(
    reconciler: &Reconciler,
    config: &SyncConfig,
    store: &dyn StateStore,
    region: &str,
    deploy: bool,
) -> Result<()> {
    let prior = store.load().await?;

    let api_id = match (&config.api.id, &config.api.name) {
        (Some(id), _) => id.clone(),
        (None, Some(name)) => reconciler.ensure_rest_api(name).await?,
        (None, None) => bail!("[api] needs a name or an id"),
    };
    let ctx = ValidationContext::new(api_id.clone(), config.api.stage.clone(), region);

    let outcome = match reconciler.reconcile(&ctx, &config.endpoints, &prior).await {
        Ok(outcome) => outcome,
        Err(ReconcileError::Partial { state, failures }) => {
            store.save(&state).await?;
            for failure in &failures {
                error!(endpoint = %failure.key, error = %failure.error, "Endpoint not reconciled");
            }
            bail!("{} endpoint(s) failed; re-run to converge", failures.len());
        }
        Err(e) => return Err(e.into()),
    };

    store.save(&outcome.state).await?;
    for key in &outcome.removed {
        info!(endpoint = %key, "Removed");
    }
    for endpoint in &outcome.state.endpoints {
        info!(
            endpoint = %endpoint.key(),
            url = endpoint.url.as_deref().unwrap_or_default(),
            "Endpoint ready"
        );
    }

    if deploy {
        if outcome.state.endpoints.is_empty() {
            warn!(api_id = %api_id, "No endpoints declared, skipping deployment");
        } else {
            reconciler.deploy(&api_id, &config.api.stage).await?;
        }
    }

    let stats = reconciler.scheduler().stats();
    info!(
        api_id = %api_id,
        endpoints = outcome.state.endpoints.len(),
        removed = outcome.removed.len(),
        remote_calls = stats.dispatched_total,
        "Sync complete"
    );
    Ok(())
}

async fn teardown(reconciler: &Reconciler, config: &SyncConfig, store: &dyn StateStore) -> Result<()> {
    let prior = store.load().await?;

    let Some(api_id) = config.api.id.clone().or(prior.rest_api_id) else {
        bail!("No REST API id in config or saved state; nothing to tear down");
    };

    reconciler.teardown(&api_id).await;
    store.clear().await?;
    info!(api_id = %api_id, "Teardown complete");
    Ok(())
}
