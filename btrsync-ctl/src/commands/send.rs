use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use btrsync_core::sys::btrfs::{self, SendOptions};
use clap::Clap;
use slog::{info, Logger};

/// Serializes a read-only subvolume as a btrfs send stream (§4.A/§4.E),
/// incremental against `--parent` when given, writing to `--output` or
/// stdout. Mirrors the kernel `btrfs send` invocation this crate is
/// interoperable with.
#[derive(Clap, Debug)]
pub struct SendOpts {
    /// The read-only subvolume to send.
    path: PathBuf,

    /// A prior snapshot to send an incremental stream against.
    #[clap(short, long)]
    parent: Option<PathBuf>,

    /// Omit file data, sending only metadata operations.
    #[clap(long)]
    no_data: bool,

    /// Ask the kernel to keep already-compressed extents compressed on the wire.
    #[clap(long)]
    compressed: bool,

    /// Write the stream here instead of stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

pub fn send(options: SendOpts, log: Logger) -> Result<()> {
    let mount = btrfs::find_root_mount(&options.path)
        .with_context(|| format!("{} is not on a mounted btrfs filesystem", options.path.display()))?;
    let tree = btrfs::build_rb_tree(&mount)?;

    let parent_root = options
        .parent
        .as_ref()
        .map(|p| {
            tree.in_order()
                .find(|r| r.full_path == *p)
                .map(|r| r.root_id)
                .ok_or_else(|| anyhow!("{} is not a subvolume on the same filesystem", p.display()))
        })
        .transpose()?;

    let send_options = SendOptions {
        parent_root,
        clone_sources: parent_root.into_iter().collect(),
        no_file_data: options.no_data,
        compressed: options.compressed,
    };

    info!(log, "sending subvolume"; "path" => %options.path.display(), "incremental" => parent_root.is_some());

    match options.output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            btrfs::send(&options.path, file.as_raw_fd(), &send_options)?;
        }
        None => {
            let stdout = std::io::stdout();
            let handle = stdout.lock();
            btrfs::send(&options.path, handle.as_raw_fd(), &send_options)?;
        }
    }

    Ok(())
}
