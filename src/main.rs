//! Cabinet - unified CLI entrypoint.
//!
//! Usage:
//!   cabinet serve --config config/cabinet.toml [--bind ADDR] [--storage PATH] [--optimize]
//!   cabinet config validate [PATH]
//!   cabinet config show [PATH]
//!   cabinet stat [--addr ADDR] [--count] [--optimize]

use anyhow::Result;
use cabinet::cli::commands::{load_config, run_config, run_serve, run_stat};
use cabinet::cli::{Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_serve(config, cli.log_level, args)
        }
        Commands::Config(args) => run_config(args),
        Commands::Stat(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_stat(config, args)
        }
    }
}
