//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use cabinet::core::config::{ClientConfig, ServerConfig};
use cabinet::rpc::{RemoteStore, Server, ServerHandle};
use cabinet::storage::ConcurrentStore;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Write a config file with the given TOML body.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    create_config(
        r#"
[server]
bind = "127.0.0.1:0"
"#,
    )
}

/// Server config on an ephemeral loopback port.
pub fn server_config(optimize: bool) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        optimize,
        ..ServerConfig::default()
    }
}

/// Serve a fresh in-memory store.
pub fn start_server(optimize: bool) -> (Arc<ConcurrentStore>, ServerHandle) {
    let store = Arc::new(ConcurrentStore::in_memory());
    let handle = serve(Arc::clone(&store), optimize);
    (store, handle)
}

/// Serve an existing store.
pub fn serve(store: Arc<ConcurrentStore>, optimize: bool) -> ServerHandle {
    Server::new(store, server_config(optimize))
        .start()
        .expect("Failed to start server")
}

/// Connect a client whose mode matches the server's.
pub fn connect(handle: &ServerHandle, optimize: bool) -> RemoteStore {
    let config = ClientConfig {
        optimize,
        ..ClientConfig::default()
    };
    RemoteStore::connect(&handle.local_addr().to_string(), config)
        .expect("Failed to connect")
}

/// Big-endian four-byte key, so keys sort the way the integers do.
pub fn key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}
