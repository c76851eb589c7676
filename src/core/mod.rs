//! Core infrastructure shared by every layer.
//!
//! - [`config`] - TOML configuration and validation
//! - [`error`] - error taxonomy
//! - [`codec`] - payload serialization and key hashing

pub mod codec;
pub mod config;
pub mod error;
