//! CLI command implementations.

mod config;
mod serve;
mod stat;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use serve::{init_tracing, run_serve, ServeArgs};
pub use stat::{run_stat, StatArgs};

use crate::core::config::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/cabinet.toml";

/// Load the configuration named on the command line, the default file if it
/// exists, or the built-in defaults.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(Path::new(path))
            .with_context(|| format!("failed to load config from {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}
