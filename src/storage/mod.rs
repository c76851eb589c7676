//! Storage layer.
//!
//! # Modules
//!
//! - [`engine`] - Storage engine interface and the iteration-time view
//! - [`memory`] - Volatile in-memory engine
//! - [`file`] - Append-log file engine with an exclusive path lock
//! - [`concurrent`] - Readers-writer guarded store over any engine
//!
//! # Invariants
//!
//! - Only `ConcurrentStore` calls into an engine, always under its lock
//! - put/get/remove are atomic with respect to each other
//! - A missing record is `None`; every other engine failure is fatal

pub mod concurrent;
pub mod engine;
pub mod file;
pub mod memory;

// Re-exports for convenience
pub use concurrent::ConcurrentStore;
pub use engine::{EngineCursor, EngineError, EngineResult, EngineView, StorageEngine};
pub use file::FileEngine;
pub use memory::MemoryEngine;
