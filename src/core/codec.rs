//! Key, value and worker serialization.
//!
//! Everything that crosses a process boundary or is stored as opaque bytes is
//! encoded with bincode's default options, which are deterministic: the same
//! value always yields the same bytes. Routing and hashing rely on that.

use crate::core::error::CabinetResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Encode a value to bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CabinetResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CabinetResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Stable 64-bit digest of a byte string.
pub fn digest(bytes: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(bytes);
    hasher.finish()
}
