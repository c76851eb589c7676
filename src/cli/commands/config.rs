//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Config file path.
        #[arg(default_value = super::DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
    /// Print the effective configuration with defaults filled in.
    Show {
        /// Config file path. Built-in defaults when omitted.
        path: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { path } => validate_config(&path),
        ConfigCommand::Show { path } => show_config(path.as_ref()),
    }
}

fn validate_config(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }
    let config = Config::from_file(path)?;
    println!("✓ {} is valid", path.display());
    if config.storage.path.is_none() {
        println!("  ⚠ Warning: storage.path not set, the store will live in memory");
    }
    Ok(())
}

fn show_config(path: Option<&PathBuf>) -> Result<()> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    println!("{}", render(&config)?);
    Ok(())
}

fn render(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_defaults_parse_back() {
        let rendered = render(&Config::default()).unwrap();
        assert!(rendered.contains("[server]"));
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.server.bind, Config::default().server.bind);
    }
}
