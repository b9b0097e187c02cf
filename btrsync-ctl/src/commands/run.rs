use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::Result;
use btrsync_core::core::engine::{run_cycle, CycleReport};
use btrsync_core::model::storage::load_config;
use clap::Clap;
use humantime::Duration as HumantimeDuration;
use slog::{info, Logger};

/// Runs one replication cycle across every configured volume, subvolume,
/// and mirror (§2's "data flow for one mirror cycle"): ensure a fresh
/// snapshot, prune by retention, sync to every mirror, prune the mirror.
#[derive(Clap, Debug)]
pub struct RunOptions {
    /// Keep running, re-scanning every `scan_interval` (or --scan-interval)
    /// instead of exiting after one cycle.
    #[clap(short, long)]
    daemon: bool,

    /// Overrides `daemon.scan_interval` from the configuration file.
    #[clap(long, value_name("duration"))]
    scan_interval: Option<HumantimeDuration>,
}

pub async fn run(options: RunOptions, config_path: Option<PathBuf>, log: Logger) -> Result<()> {
    let config = load_config(config_path.as_deref())?;

    if !options.daemon {
        let report = run_cycle(&config, &log).await?;
        log_report(&log, &report);
        return Ok(());
    }

    let interval = options
        .scan_interval
        .map(Into::into)
        .or(config.daemon.scan_interval)
        .unwrap_or_else(|| StdDuration::from_secs(60));

    loop {
        let report = run_cycle(&config, &log).await?;
        log_report(&log, &report);
        tokio::time::sleep(interval).await;
    }
}

fn log_report(log: &Logger, report: &CycleReport) {
    info!(log, "replication cycle complete";
        "subvolumes" => report.subvolumes_scanned,
        "snapshots_created" => report.snapshots_created,
        "snapshots_pruned" => report.snapshots_pruned,
        "mirrors_synced" => report.mirrors_synced,
        "mirror_entries_pruned" => report.mirror_entries_pruned);
}
