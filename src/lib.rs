//! Cabinet - a concurrent, network-transparent, shardable key-value store.
//!
//! Cabinet puts a thread-safe map of byte keys to byte values over a
//! pluggable storage engine, serves it over a small length-prefixed TCP
//! protocol, and composes local and remote stores behind one shard router.
//! Bulk reads run as workers: serializable visitors that travel to the data,
//! scan it under a read lock, and travel back to be combined.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                   Store trait / TypedMap                  │
//! └───────────────────────────────────────────────────────────┘
//!          │                    │                    │
//! ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐
//! │ ConcurrentStore │  │   RemoteStore   │  │   ShardRouter   │
//! │ (RwLock engine) │  │ (ordered queue) │  │ (scoped fan-out)│
//! └─────────────────┘  └─────────────────┘  └─────────────────┘
//!          │                    │ TCP
//! ┌─────────────────┐  ┌─────────────────┐
//! │ StorageEngine   │  │  rpc::Server    │── ConcurrentStore
//! │ memory / file   │  │ thread per conn │
//! └─────────────────┘  └─────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core`] - configuration, errors, codec helpers
//! - [`storage`] - engines and [`ConcurrentStore`]
//! - [`worker`] - the worker contract, built-in workers, registry
//! - [`store`] - the [`Store`] abstraction and typed views
//! - [`rpc`] - wire protocol, server, and [`RemoteStore`]
//! - [`net`] - connection access control
//! - [`shard`] - [`ShardRouter`] and routing functions
//! - [`cli`] - the `cabinet` binary's commands

// Core infrastructure
pub mod core;

// Storage layer
pub mod storage;

// Iteration workers
pub mod worker;

// Store abstraction
pub mod store;

// Wire protocol, server, client
pub mod rpc;

// Networking
pub mod net;

// Sharding
pub mod shard;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::error::{CabinetError, CabinetResult};
pub use self::core::{codec, config, error};
pub use rpc::{RemoteStore, Server, ServerHandle};
pub use shard::{HashShardFunction, ShardFunction, ShardRouter};
pub use storage::{ConcurrentStore, FileEngine, MemoryEngine, StorageEngine};
pub use store::{Store, StoreHandle, TypedMap};
pub use worker::{Worker, WorkerRegistry};
