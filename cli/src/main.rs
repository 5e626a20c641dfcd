use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use paramsync_runtime::testing::DummySolver;
use paramsync_runtime::{Coordinator, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs a data-parallel synchronization round against the in-house CPU reference backend. No
/// real model is trained here — `DummySolver` stands in for whatever solver a caller would bind
/// in its place; this binary exists to exercise `Coordinator` end to end from a config file.
#[derive(Parser, Debug)]
struct Args {
    /// Path to a TOML `SyncConfig`. If omitted, runs a single-device default configuration.
    #[clap(long, env)]
    config: Option<PathBuf>,

    /// Number of scalar parameters the demo solver's single parameter tensor holds.
    #[clap(long, env, default_value_t = 16)]
    param_len: usize,

    /// Overrides the configured step budget.
    #[clap(long, env, default_value_t = 4)]
    steps: u64,
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
            toml::from_str(&text).with_context(|| format!("parsing {path:?} as a SyncConfig"))
        }
        None => Ok(SyncConfig::default()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    config.validate().context("invalid sync config")?;

    info!(world_size = config.world_size(), backend = ?config.backend, "starting run");

    let solver = DummySolver::new(
        vec![vec![0.0; args.param_len]],
        0,
        args.steps,
        config.random_seed,
        config.reduction_mode,
    );
    let mut coordinator = Coordinator::new(config, solver)?;
    coordinator.run()?;

    for worker in coordinator.workers() {
        info!(rank = worker.rank(), total_len = worker.buffers().total_len(), "worker finished");
    }

    Ok(())
}
