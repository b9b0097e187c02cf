use std::path::PathBuf;

use anyhow::Result;
use btrsync_core::model::storage::load_config;
use clap::Clap;
use comfy_table::Cell;

use crate::ui::print_comfy_table;

/// Validates and inspects the layered TOML configuration (§6).
#[derive(Clap, Debug)]
pub struct ConfigOptions {
    #[clap(subcommand)]
    subcmd: ConfigSubCommands,
}

#[derive(Clap, Debug)]
enum ConfigSubCommands {
    /// Parses the configuration and resolves every (volume, subvolume)
    /// pair, surfacing the first validation error (§4.F's
    /// `interval < minimum_retention < retention` invariant) if any.
    Check(ConfigCheckOptions),
    /// Prints the fully-resolved settings for every enabled subvolume.
    Show(ConfigShowOptions),
}

#[derive(Clap, Debug)]
struct ConfigCheckOptions {}

#[derive(Clap, Debug)]
struct ConfigShowOptions {}

pub fn config(options: ConfigOptions, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let resolved = config.resolved_subvolumes()?;

    match options.subcmd {
        ConfigSubCommands::Check(_) => {
            println!("configuration is valid: {} subvolume(s) resolved", resolved.len());
        }
        ConfigSubCommands::Show(_) => {
            print_comfy_table(
                vec![
                    Cell::new("Path"),
                    Cell::new("Interval"),
                    Cell::new("Min Retention"),
                    Cell::new("Retention"),
                    Cell::new("Retention Interval"),
                    Cell::new("Mirrors"),
                ],
                resolved.iter().map(|r| {
                    vec![
                        Cell::new(r.subvolume.path.display()),
                        Cell::new(humantime::format_duration(r.settings.snapshot_interval)),
                        Cell::new(humantime::format_duration(r.settings.snapshot_min_retention)),
                        Cell::new(humantime::format_duration(r.settings.snapshot_retention)),
                        Cell::new(humantime::format_duration(r.settings.snapshot_retention_interval)),
                        Cell::new(r.mirrors.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")),
                    ]
                }),
            );
        }
    }

    Ok(())
}
