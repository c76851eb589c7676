//! Sharding layer.
//!
//! - [`function`] - Key to shard index routing
//! - [`router`] - Fan-out and combine over a table of stores

pub mod function;
pub mod router;

pub use function::{HashShardFunction, ShardFunction};
pub use router::{FanOut, ShardRouter};
