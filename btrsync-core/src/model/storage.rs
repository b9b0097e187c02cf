//! Where the daemon and CLI find the TOML configuration (§6) on disk.

use std::path::Path;

use anyhow::Result;

use crate::model::config::Config;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/btrsync/config.toml";

/// Loads the configuration from `path`, or from [`DEFAULT_CONFIG_PATH`] if
/// `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH)))
}
