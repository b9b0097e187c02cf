use std::path::PathBuf;

use anyhow::{Context, Result};
use btrsync_core::sys::btrfs::{self, RootTree};
use clap::Clap;
use comfy_table::Cell;

use crate::ui::{comfy_bool_value, comfy_id_value, print_comfy_table};

/// Prints every subvolume and snapshot on the btrfs filesystem containing
/// `path`, pre-order (§3's "root tree": a root before any descendant),
/// indented by depth.
#[derive(Clap, Debug)]
pub struct TreeOptions {
    /// Any path on the btrfs filesystem to inspect.
    path: PathBuf,
}

pub fn tree(options: TreeOptions) -> Result<()> {
    let mount = btrfs::find_root_mount(&options.path)
        .with_context(|| format!("{} is not on a mounted btrfs filesystem", options.path.display()))?;
    let tree = btrfs::build_rb_tree(&mount)?;

    let rows = tree.pre_order().into_iter().map(|root| {
        let depth = ancestor_depth(&tree, root.parent_root_id);
        let indented_name = format!("{}{}", "  ".repeat(depth), root.name);
        vec![
            comfy_id_value(root.uuid),
            Cell::new(root.root_id),
            Cell::new(indented_name),
            Cell::new(root.path.display()),
            comfy_bool_value(root.read_only),
            root.received_uuid.map(comfy_id_value).unwrap_or_else(|| Cell::new("-")),
        ]
    });

    print_comfy_table(
        vec![
            Cell::new("UUID"),
            Cell::new("Root ID"),
            Cell::new("Name"),
            Cell::new("Path"),
            Cell::new("RO"),
            Cell::new("Received From"),
        ],
        rows,
    );

    Ok(())
}

fn ancestor_depth(tree: &RootTree, mut parent: Option<u64>) -> usize {
    let mut depth = 0;
    while let Some(id) = parent {
        depth += 1;
        parent = tree.get(id).and_then(|r| r.parent_root_id);
    }
    depth
}
