//! Networking layer.
//!
//! - [`access`] - Source-address predicates consulted before the handshake

pub mod access;

pub use access::{AccessControl, AllowAll, AllowList, LocalhostOnly};
