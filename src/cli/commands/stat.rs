//! Stat command implementation.

use crate::core::config::{ClientConfig, Config};
use crate::rpc::RemoteStore;
use anyhow::{Context, Result};
use clap::Args;

/// Print the size of a remote store.
#[derive(Args, Debug)]
pub struct StatArgs {
    /// Server address. Defaults to `server.bind` from the config.
    #[arg(short, long)]
    pub addr: Option<String>,

    /// Also count entries with a full iteration.
    #[arg(long)]
    pub count: bool,

    /// Request optimized mode, for servers started with `--optimize`.
    #[arg(long)]
    pub optimize: bool,
}

fn client_config(config: &Config, args: &StatArgs) -> ClientConfig {
    let mut client = config.client.clone();
    if args.optimize {
        client.optimize = true;
    }
    client
}

/// Run the stat command.
pub fn run_stat(config: Config, args: StatArgs) -> Result<()> {
    let client = client_config(&config, &args);
    let addr = args.addr.unwrap_or_else(|| config.server.bind.clone());
    let store = RemoteStore::connect(&addr, client)
        .with_context(|| format!("failed to connect to {}", addr))?;

    println!("Cabinet Store");
    println!("=============");
    println!("Peer:       {}", store.peer_addr());
    println!("Optimized:  {}", store.optimized());
    println!("Size:       {}", store.size()?);
    if args.count {
        let count = store.iterate::<crate::worker::CountEntries>(&())?;
        println!("Counted:    {}", count.count);
    }

    store.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerConfig;
    use crate::rpc::Server;
    use crate::storage::ConcurrentStore;
    use std::sync::Arc;

    fn args(optimize: bool) -> StatArgs {
        StatArgs {
            addr: None,
            count: false,
            optimize,
        }
    }

    #[test]
    fn test_optimize_flag_overrides_client_config() {
        let config = Config::default();
        assert!(!client_config(&config, &args(false)).optimize);
        assert!(client_config(&config, &args(true)).optimize);
    }

    #[test]
    fn test_stat_against_optimized_server() {
        let server = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            optimize: true,
            ..ServerConfig::default()
        };
        let handle = Server::new(Arc::new(ConcurrentStore::in_memory()), server)
            .start()
            .unwrap();

        let stat = StatArgs {
            addr: Some(handle.local_addr().to_string()),
            count: true,
            optimize: true,
        };
        run_stat(Config::default(), stat).unwrap();
    }
}
