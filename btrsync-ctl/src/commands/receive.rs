use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use btrsync_core::backend::archive::ArchiveReceiver;
use btrsync_core::backend::directory::DirectoryReceiver;
use btrsync_core::backend::local::LocalReceiver;
use btrsync_core::core::mirror::MirrorFormat;
use btrsync_core::receive::{process_send_stream, ReceiveOptions, Receiver, ReceiverHooks};
use btrsync_core::sys::btrfs;
use clap::Clap;
use slog::{info, Logger};
use uuid::Uuid;

/// Applies a btrfs send stream (read from `--input` or stdin) to a
/// destination, dispatching through the backend named by `--format`
/// (component D). Equivalent in spirit to the kernel's `btrfs receive`,
/// generalized across the destination kinds this crate supports.
#[derive(Clap, Debug)]
pub struct ReceiveOpts {
    /// Destination root: a btrfs mount point, a plain directory, or an
    /// archive directory, depending on `--format`.
    destination: PathBuf,

    /// `subvolume`, `directory`, `gzip`, `zlib`, `zstd`, or `lzw`.
    #[clap(short, long, default_value = "directory")]
    format: String,

    /// Read the stream from this file instead of stdin.
    #[clap(short, long)]
    input: Option<PathBuf>,

    /// Resume at this command offset instead of 0 (§3's per-destination
    /// progress record; see also the prefix-diff routine in §4.A).
    #[clap(long, default_value = "0")]
    start_offset: u64,

    /// Non-fatal dispatch errors tolerated before aborting (§4.C).
    #[clap(long, default_value = "1")]
    max_errors: u32,

    #[clap(long)]
    ignore_checksums: bool,

    /// Snapshot name used to name the artifact file; required for archive formats.
    #[clap(long)]
    name: Option<String>,

    /// Subvolume UUID the archive's completion marker is filed under; required for archive formats.
    #[clap(long)]
    uuid: Option<String>,
}

pub async fn receive(options: ReceiveOpts, log: Logger) -> Result<()> {
    let format = MirrorFormat::parse(&options.format).map_err(|e| anyhow!(e))?;

    let reader: Box<dyn Read + Send> = match &options.input {
        Some(path) => Box::new(File::open(path).with_context(|| format!("opening {}", path.display()))?),
        None => Box::new(std::io::stdin()),
    };

    if let MirrorFormat::Archive(archive_format) = format {
        let name = options.name.ok_or_else(|| anyhow!("--name is required for archive formats"))?;
        let uuid = options
            .uuid
            .ok_or_else(|| anyhow!("--uuid is required for archive formats"))
            .and_then(|s| Uuid::parse_str(&s).context("invalid --uuid"))?;
        let receiver = ArchiveReceiver::new(options.destination, archive_format);
        receiver.write_stream(&name, uuid, reader).await.map_err(|e| anyhow!(e))?;
        info!(log, "archive receive complete"; "snapshot" => name);
        return Ok(());
    }

    let (receiver, hooks): (Arc<dyn Receiver>, Option<Arc<dyn ReceiverHooks>>) = match format {
        MirrorFormat::Subvolume => {
            let mount = btrfs::find_root_mount(&options.destination)
                .with_context(|| format!("{} is not on a mounted btrfs filesystem", options.destination.display()))?;
            (Arc::new(LocalReceiver::new(mount, options.destination.clone())), None)
        }
        MirrorFormat::Directory => {
            let receiver = Arc::new(DirectoryReceiver::new(options.destination.clone()));
            (receiver.clone(), Some(receiver as Arc<dyn ReceiverHooks>))
        }
        MirrorFormat::Archive(_) => unreachable!("handled above"),
    };

    let mut recv_options = ReceiveOptions::new(log.clone(), receiver);
    recv_options.hooks = hooks;
    recv_options.start_offset = options.start_offset;
    recv_options.max_errors = options.max_errors;
    recv_options.ignore_checksums = options.ignore_checksums;

    process_send_stream(reader, recv_options).await?;
    info!(log, "receive complete"; "destination" => %options.destination.display());
    Ok(())
}
