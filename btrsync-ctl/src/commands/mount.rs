use anyhow::Result;
use btrsync_core::sys::btrfs;
use clap::Clap;
use comfy_table::Cell;

use crate::ui::print_comfy_table;

/// Lists every mounted btrfs filesystem on the system (§4.E's `list_mounts`).
#[derive(Clap, Debug)]
pub struct MountOptions {}

pub fn mount(_options: MountOptions) -> Result<()> {
    let mounts = btrfs::list_mounts()?;

    print_comfy_table(
        vec![Cell::new("Device"), Cell::new("Mount Point")],
        mounts.into_iter().map(|m| vec![Cell::new(m.device.display()), Cell::new(m.mount_point.display())]),
    );

    Ok(())
}
