use std::path::PathBuf;

use anyhow::Result;
use btrsync_app::btrsync_app_run;
use clap::{crate_version, Clap};
use slog::Logger;

mod commands;
mod ui;

use commands::config::{config, ConfigOptions};
use commands::mount::{mount, MountOptions};
use commands::prune::{prune, PruneOptions};
use commands::receive::{receive, ReceiveOpts};
use commands::run::{run, RunOptions};
use commands::send::{send, SendOpts};
use commands::serve::{serve, ServeOptions};
use commands::tree::{tree, TreeOptions};

fn main() {
    match CliOptions::try_parse() {
        Ok(options) => {
            let vcount = options.verbose as usize;
            btrsync_app_run(|log| command_dispatch(options, log), vcount);
        }
        Err(e) => {
            let message = e.to_string();
            println!("{}", message.replace("error:", "ERRO:"));
            println!();
        }
    }
}

async fn command_dispatch(options: CliOptions, log: Logger) -> Result<()> {
    match options.subcmd {
        TopCommands::Run(o) => run(o, options.config, log).await,
        TopCommands::Send(o) => send(o, log),
        TopCommands::Receive(o) => receive(o, log).await,
        TopCommands::Prune(o) => prune(o, options.config, log).await,
        TopCommands::Tree(o) => tree(o),
        TopCommands::Mount(o) => mount(o),
        TopCommands::Config(o) => config(o, options.config),
        TopCommands::Serve(o) => serve(o).await,
    }
}

/// A btrfs snapshot replication engine: periodic snapshots, retention
/// pruning, and send-stream replication to local, directory, archive, or
/// SSH mirrors (§1).
#[derive(Clap)]
#[clap(version = crate_version!(), author = "opensource@rebeagle.com")]
struct CliOptions {
    /// Enable debug logs. Use twice to enable trace logs.
    #[clap(short, long, parse(from_occurrences), global = true)]
    verbose: i32,

    /// Path to the TOML configuration file (defaults to
    /// `/etc/btrsync/config.toml`).
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    subcmd: TopCommands,
}

#[derive(Clap)]
enum TopCommands {
    /// Run one (or, with `--daemon`, a repeating) replication cycle.
    Run(RunOptions),
    /// Serialize a subvolume as a send stream.
    Send(SendOpts),
    /// Apply a send stream to a destination.
    Receive(ReceiveOpts),
    /// Prune retention and stale mirror entries without syncing anew.
    Prune(PruneOptions),
    /// Print a filesystem's subvolume tree.
    Tree(TreeOptions),
    /// List mounted btrfs filesystems.
    Mount(MountOptions),
    /// Validate or inspect the configuration.
    Config(ConfigOptions),
    /// Query the worker daemon's status.
    Serve(ServeOptions),
}
