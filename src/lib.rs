// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fsm;
pub mod intake;
pub mod logging;
pub mod store;
pub mod workflow;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::Runtime;
use crate::store::Store;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the durable store and runtime
/// - the periodic sweep loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    if let Some(data_dir) = &args.data_dir {
        cfg.store.data_dir = PathBuf::from(data_dir);
    }

    let store = Store::open(&cfg.store.data_dir, cfg.lease.to_lease_table())
        .context("opening store")?;
    let runtime = Runtime::new(store);

    if args.dry_run {
        print_dry_run(&cfg, &runtime).await;
        return Ok(());
    }

    // Catch up on anything that came due while the process was down.
    runtime.sweep().await.context("startup sweep")?;

    if args.once {
        info!("single sweep pass complete");
        return Ok(());
    }

    let sweeper = runtime.spawn_sweeper(Duration::from_secs(cfg.sweep.interval_secs));
    info!(
        interval_secs = cfg.sweep.interval_secs,
        data_dir = %cfg.store.data_dir.display(),
        "taskdag running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down");
    sweeper.abort();

    Ok(())
}

async fn print_dry_run(cfg: &ConfigFile, runtime: &Runtime) {
    let counts = runtime.task_counts().await;
    println!("data dir: {}", cfg.store.data_dir.display());
    println!(
        "records: pending={} claimed={} processing={} completed={} failed={}",
        counts.pending, counts.claimed, counts.processing, counts.completed, counts.failed
    );
    let workflows = runtime
        .query_workflows(&store::WorkflowFilter::default())
        .await;
    println!("workflows: {}", workflows.total);
    for wf in &workflows.workflows {
        println!("  {} [{:?}] {} steps", wf.id, wf.status, wf.steps.len());
    }
}
