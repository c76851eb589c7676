//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Cabinet - concurrent, network-transparent key-value store.
#[derive(Parser, Debug)]
#[command(name = "cabinet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve a store over TCP.
    Serve(commands::ServeArgs),

    /// Configuration utilities.
    Config(commands::ConfigArgs),

    /// Print the size of a remote store.
    Stat(commands::StatArgs),
}
