//! Error types for every Cabinet layer.
//!
//! One taxonomy covers the local store, the RPC client and server, and the
//! shard router. "No record" is never an error: lookups return `Option`.
//! Storage failures other than a missing record are fatal and are never
//! retried by this crate.

use thiserror::Error;

/// Common Cabinet error conditions.
#[derive(Debug, Error)]
pub enum CabinetError {
    /// Invalid configuration or construction parameters.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The TCP connection to a remote store could not be established.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server offered a different mode than the client asked for.
    #[error(
        "handshake mismatch: expected {} mode, server offered {} mode",
        mode_name(*expected_optimized),
        mode_name(*offered_optimized)
    )]
    HandshakeMismatch {
        expected_optimized: bool,
        offered_optimized: bool,
    },

    /// A garbled, unexpected or oversized frame.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// The server executed the command and reported FAILURE.
    #[error("remote operation failed: {message}")]
    RemoteOperation { message: String },

    /// Stream IO failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Non-recoverable storage engine failure, carrying the engine diagnostic.
    #[error("storage engine failure (code {code}): {message}")]
    StorageFatal { code: i32, message: String },

    /// The record count does not fit the requested integer type.
    #[error("store size {count} exceeds the range of {target}")]
    SizeOverflow { count: u64, target: &'static str },

    /// No worker is registered under the requested tag.
    #[error("unknown worker: {tag}")]
    UnknownWorker { tag: String },

    /// Key, value, worker or config could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// The store, client or router has been closed.
    #[error("store is closed")]
    Closed,

    /// The command was still queued when the client force-closed.
    #[error("command cancelled before it ran")]
    Cancelled,

    /// A synchronous caller gave up waiting.
    #[error("timed out after {elapsed_ms} ms waiting for {operation}")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u64,
    },

    /// One shard of a fan-out failed.
    #[error("shard {index} failed: {source}")]
    Shard {
        index: usize,
        #[source]
        source: Box<CabinetError>,
    },
}

fn mode_name(optimized: bool) -> &'static str {
    if optimized {
        "optimized"
    } else {
        "unoptimized"
    }
}

impl CabinetError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a ProtocolViolation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a RemoteOperation error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteOperation {
            message: message.into(),
        }
    }

    /// Create a Codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Wrap an error raised by one shard of a fan-out.
    pub fn shard(index: usize, source: CabinetError) -> Self {
        Self::Shard {
            index,
            source: Box::new(source),
        }
    }

    /// Check if this error leaves an RPC stream unusable.
    ///
    /// After a transport or protocol failure the request/response pairing on
    /// the stream can no longer be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::ProtocolViolation { .. }
        )
    }

    /// Rebuild an equivalent error for a later caller of a poisoned stream.
    pub fn replay(&self) -> Self {
        match self {
            Self::Transport { message } => Self::transport(message.clone()),
            Self::ProtocolViolation { message } => Self::protocol(message.clone()),
            other => Self::transport(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CabinetError {
    fn from(error: std::io::Error) -> Self {
        Self::transport(error.to_string())
    }
}

impl From<bincode::Error> for CabinetError {
    fn from(error: bincode::Error) -> Self {
        Self::codec(error.to_string())
    }
}

/// Result type using CabinetError.
pub type CabinetResult<T> = Result<T, CabinetError>;
