use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use traffic_store::{build_store, AppConfig, TableStore};

// Usage: build_store [observed.csv] [predicted.csv] [store.json]
// Missing arguments fall back to TRAFFIC_CONFIG / env / defaults.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = AppConfig::from_env().context("failed to read configuration")?;
    let mut args = std::env::args().skip(1);
    let observed = args.next().map(PathBuf::from).unwrap_or(cfg.observed_csv.clone());
    let predicted = args.next().map(PathBuf::from).unwrap_or(cfg.predicted_csv.clone());
    let store_path = args.next().map(PathBuf::from).unwrap_or(cfg.store_path.clone());

    tracing::info!("importing {} and {}", observed.display(), predicted.display());
    let store = build_store(&observed, &predicted, &store_path, &cfg.load_options())
        .with_context(|| format!("failed to build store at {}", store_path.display()))?;

    // Verify the published file reads back the same tables
    let reopened = TableStore::open(&store_path)
        .with_context(|| format!("failed to reopen {}", store_path.display()))?;
    if reopened != store {
        anyhow::bail!("store at {} does not read back as written", store_path.display());
    }

    for summary in reopened.summaries() {
        tracing::info!("{}: {} rows, columns {:?}", summary.name, summary.rows, summary.columns);
    }
    tracing::info!("store build completed: {}", store_path.display());
    Ok(())
}
