//! Configuration parsing and validation.
//!
//! Cabinet configuration is loaded from TOML files with CLI overrides.
//! Every section is optional; a missing section takes its defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Largest frame either side of a connection accepts by default (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Top-level Cabinet configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// RPC server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Backing store configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// RPC server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:7878"). Port 0 picks a free port.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Mode offered in the handshake of every new connection.
    #[serde(default)]
    pub optimize: bool,

    /// Source IPs allowed to connect. Empty means everyone.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Accept loopback peers only.
    #[serde(default)]
    pub localhost_only: bool,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            optimize: false,
            allow: Vec::new(),
            localhost_only: false,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Backing store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the file-backed store. Unset keeps everything in memory.
    #[serde(default)]
    pub path: Option<String>,
}

/// Remote client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Request optimized mode in the handshake.
    #[serde(default)]
    pub optimize: bool,

    /// How long close() waits for queued commands before cancelling them.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Per-request wait bound for synchronous calls. Unset waits forever.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// TCP connect timeout. Unset uses the OS default.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Maximum accepted frame size in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            optimize: false,
            drain_timeout_ms: default_drain_timeout_ms(),
            request_timeout_ms: None,
            connect_timeout_ms: None,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl ClientConfig {
    /// Client config in optimized mode with every other field defaulted.
    pub fn optimized() -> Self {
        Self {
            optimize: true,
            ..Self::default()
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self) -> Result<()> {
        if self.drain_timeout_ms == 0 {
            anyhow::bail!("client.drain_timeout_ms must be > 0");
        }
        if self.request_timeout_ms == Some(0) {
            anyhow::bail!("client.request_timeout_ms must be > 0 when set");
        }
        if self.connect_timeout_ms == Some(0) {
            anyhow::bail!("client.connect_timeout_ms must be > 0 when set");
        }
        validate_frame_limit("client.max_frame_bytes", self.max_frame_bytes)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_drain_timeout_ms() -> u64 {
    120_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn validate_frame_limit(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        anyhow::bail!("{} must be > 0", field);
    }
    if value as u64 > u32::MAX as u64 {
        anyhow::bail!("{} must fit a 32-bit frame length, got: {}", field, value);
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ref path) = overrides.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(optimize) = overrides.optimize {
            self.server.optimize = optimize;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_storage()?;
        self.client.validate()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))?;

        for entry in &self.server.allow {
            entry
                .parse::<IpAddr>()
                .with_context(|| format!("server.allow entry is not an IP address: {}", entry))?;
        }

        // The two filters would silently shadow each other.
        if self.server.localhost_only && !self.server.allow.is_empty() {
            anyhow::bail!("server.localhost_only and server.allow are mutually exclusive");
        }

        validate_frame_limit("server.max_frame_bytes", self.server.max_frame_bytes)
    }

    fn validate_storage(&self) -> Result<()> {
        if let Some(ref path) = self.storage.path {
            if path.trim().is_empty() {
                anyhow::bail!("storage.path must not be empty when set");
            }
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override server bind address.
    pub bind: Option<String>,
    /// Override storage path.
    pub storage_path: Option<String>,
    /// Override the mode offered to new connections.
    pub optimize: Option<bool>,
}
