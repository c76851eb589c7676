//! Client-server protocol over TCP.
//!
//! One long-lived connection per client, framed as length-prefixed bincode
//! messages. Each connection is served by its own OS thread, so commands on
//! one connection run strictly in arrival order.
//!
//! # Modules
//!
//! - [`message`] - `Command`, `Reply` and `Status` wire types
//! - [`codec`] - Frame encoding and incremental decoding
//! - [`connection`] - Blocking framed stream with per-connection stats
//! - [`queue`] - Single-thread ordered command queue used by the client
//! - [`server`] - Accept loop and per-connection dispatcher
//! - [`client`] - `RemoteStore`, the client stub

pub mod client;
pub mod codec;
pub mod connection;
pub mod message;
pub mod queue;
pub mod server;

pub use client::RemoteStore;
pub use message::{Command, Reply, Status, PROTOCOL_VERSION};
pub use server::{Server, ServerHandle, ServerMetricsSnapshot};

/// Result of decoding a frame from the wire.
#[derive(Debug)]
pub enum DecodeResult<T> {
    /// A complete frame was decoded.
    Complete(T),
    /// More data is needed to complete the frame.
    Incomplete,
    /// The input is invalid.
    Invalid(String),
}

impl<T> DecodeResult<T> {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::Incomplete)
    }
}
