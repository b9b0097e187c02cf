use std::path::PathBuf;

use anyhow::Result;
use btrsync_core::core::engine::prune_cycle;
use btrsync_core::model::storage::load_config;
use clap::Clap;
use slog::{info, Logger};

/// Prunes the retention set on every configured subvolume and removes
/// stale entries from every mirror (§4.F/§4.G), without forcing a new
/// snapshot or sending anything new.
#[derive(Clap, Debug)]
pub struct PruneOptions {}

pub async fn prune(_options: PruneOptions, config_path: Option<PathBuf>, log: Logger) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let report = prune_cycle(&config, &log).await?;
    info!(log, "prune complete";
        "subvolumes" => report.subvolumes_scanned,
        "snapshots_pruned" => report.snapshots_pruned,
        "mirror_entries_pruned" => report.mirror_entries_pruned);
    Ok(())
}
