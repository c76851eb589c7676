//! Wire messages.
//!
//! Every exchange is one `Command` from the client followed by zero or one
//! payload `Reply` and exactly one `Reply::Status`:
//!
//! | Command       | Payload on success                   |
//! |---------------|--------------------------------------|
//! | Put / Remove  | `Value(previous)` in unoptimized mode |
//! | Get           | `Value`                              |
//! | Iterate       | `Worker`                             |
//! | Size          | `Size`                               |
//! | Clear, SetOptimize, Close | none                     |
//!
//! On failure the payload is omitted and `Status(Failure)` follows the
//! command directly. The first frame on a connection is the server's
//! `ConnectionOkay`.

use serde::{Deserialize, Serialize};

/// Bumped on any incompatible change to `Command` or `Reply`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    Put { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Remove { key: Vec<u8> },
    Iterate { worker: String, config: Vec<u8> },
    Size,
    Clear,
    SetOptimize { optimize: bool },
    Close,
}

impl Command {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Put { .. } => "PUT",
            Self::Get { .. } => "GET",
            Self::Remove { .. } => "REMOVE",
            Self::Iterate { .. } => "ITERATE",
            Self::Size => "SIZE",
            Self::Clear => "CLEAR",
            Self::SetOptimize { .. } => "SET_OPTIMIZE",
            Self::Close => "CLOSE",
        }
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure(String),
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Handshake, sent once when the connection is accepted.
    ConnectionOkay { version: u32, optimized: bool },
    Value(Option<Vec<u8>>),
    /// An encoded finished worker.
    Worker(Vec<u8>),
    Size(i64),
    Status(Status),
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionOkay { .. } => "ConnectionOkay",
            Self::Value(_) => "Value",
            Self::Worker(_) => "Worker",
            Self::Size(_) => "Size",
            Self::Status(_) => "Status",
        }
    }
}
