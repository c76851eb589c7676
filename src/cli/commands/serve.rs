//! Serve command implementation.

use crate::core::config::{Config, ConfigOverrides};
use crate::rpc::Server;
use crate::storage::ConcurrentStore;
use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;

/// Serve a store over TCP.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Override the bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Back the store with a log file at this path instead of memory.
    #[arg(long)]
    pub storage: Option<String>,

    /// Offer optimized mode to new connections.
    #[arg(long)]
    pub optimize: bool,
}

/// Initialize tracing subscriber.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second call keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// No-op tracing init when telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}

/// Run the serve command until the accept loop exits.
pub fn run_serve(mut config: Config, log_level: Option<String>, args: ServeArgs) -> Result<()> {
    config.apply_overrides(&ConfigOverrides {
        log_level,
        bind: args.bind,
        storage_path: args.storage,
        optimize: args.optimize.then_some(true),
    });
    config.validate()?;
    init_tracing(&config.telemetry.log_level);

    let span = tracing::info_span!("cabinet", bind = %config.server.bind);
    let store = match config.storage.path {
        Some(ref path) => ConcurrentStore::open(path)
            .with_context(|| format!("failed to open store at {}", path))?,
        None => ConcurrentStore::in_memory(),
    };
    let store = Arc::new(store.with_span(tracing::info_span!(parent: &span, "store")));

    let handle = Server::new(Arc::clone(&store), config.server.clone())
        .with_span(tracing::info_span!(parent: &span, "server"))
        .start()?;

    tracing::info!(
        parent: &span,
        addr = %handle.local_addr(),
        optimize = config.server.optimize,
        persistent = config.storage.path.is_some(),
        "cabinet serving"
    );

    handle.join();
    store.close()?;
    Ok(())
}
