//! Configuration management system for fleetcp
//!
//! This crate provides the static host registry (the table of server
//! descriptors the engine may transfer between) and the engine tunables,
//! loaded from YAML or TOML with environment variable overrides and
//! validated before use.
//!
//! # Examples
//!
//! ```rust,no_run
//! use fleetcp_config::{Config, ConfigLoader};
//!
//! let config = ConfigLoader::load_from_file("fleetcp.yaml")
//!     .expect("Failed to load configuration");
//! let host = config.host("10.20.0.5").expect("unknown host");
//! println!("{} runs {:?}", host.name, host.os);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use fleetcp_types::OsKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for fleetcp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Control host identity
    pub control: ControlConfig,
    /// Static table of reachable servers
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,
    /// Transfer scheduling tunables
    pub transfer: TransferConfig,
    /// SSH session pool tunables
    pub pool: PoolConfig,
    /// Listing cache tunables
    pub cache: CacheConfig,
    /// Stale-transfer watchdog tunables
    pub watchdog: WatchdogConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Audit log and remembered-path persistence
    pub audit: AuditConfig,
}

impl Config {
    /// Look up a server descriptor by name or address
    pub fn host(&self, key: &str) -> Option<&ServerDescriptor> {
        self.servers
            .iter()
            .find(|s| s.name == key || s.address == key)
    }

    /// Look up a server descriptor, erroring on unknown hosts
    pub fn require_host(&self, key: &str) -> ConfigResult<&ServerDescriptor> {
        self.host(key).ok_or_else(|| ConfigError::unknown_host(key))
    }
}

/// Identity of the control host the engine runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Address other hosts and clients use to reach the control host
    pub address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
        }
    }
}

/// One entry of the host registry, immutable after load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Human-readable name, unique within the registry
    pub name: String,
    /// Address used for SSH and tool invocations
    pub address: String,
    /// Login user
    pub user: String,
    /// Password for password authentication and sshpass wrapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Private key path for public-key authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Operating system family of the host
    #[serde(default)]
    pub os: OsKind,
    /// SSH port when not the default 22
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Default browse path for NAS appliances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<String>,
}

impl ServerDescriptor {
    /// Effective SSH port
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    /// Default path to open when a client first browses this host
    pub fn default_path(&self) -> String {
        if let Some(path) = &self.default_path {
            return path.clone();
        }
        match self.os {
            OsKind::Windows => "C:/".to_string(),
            OsKind::Posix => format!("/home/{}", self.user),
        }
    }
}

/// Transfer scheduling tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Worker pool bound for per-item parallel execution
    pub max_workers: usize,
    /// Maximum number of items folded into one batched invocation
    pub batch_max_files: usize,
    /// Ceiling for any single copy-tool invocation, in seconds
    pub command_timeout_secs: u64,
    /// Admission bound on concurrently active transfers
    pub max_active_transfers: usize,
    /// Interval between progress events, in milliseconds
    pub progress_interval_ms: u64,
    /// Simulated speed band for POSIX-only transfers, in MB/s
    pub speed_band_mbps: (f64, f64),
    /// Simulated speed band when a Windows host is involved, in MB/s
    pub windows_speed_band_mbps: (f64, f64),
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            batch_max_files: 200,
            command_timeout_secs: 600,
            max_active_transfers: 64,
            progress_interval_ms: 500,
            speed_band_mbps: (110.0, 114.0),
            windows_speed_band_mbps: (50.0, 55.0),
        }
    }
}

/// SSH session pool tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live sessions kept per host
    pub max_sessions_per_host: usize,
    /// TCP connect timeout, in seconds
    pub connect_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_host: 3,
            connect_timeout_secs: 10,
        }
    }
}

/// Listing cache tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cached listings, in seconds
    pub ttl_secs: u64,
    /// Longer time-to-live for first-load "instant" paths, in seconds
    pub instant_ttl_secs: u64,
    /// Paths granted the longer TTL
    #[serde(default)]
    pub instant_paths: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            instant_ttl_secs: 300,
            instant_paths: Vec::new(),
        }
    }
}

/// Stale-transfer watchdog tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Sweep interval, in seconds
    pub interval_secs: u64,
    /// Age past which a transfer with no live work is reaped, in seconds
    pub stale_after_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 12 * 3600,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable file logging
    pub enable_file_logging: bool,
    /// Log file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_file_logging: false,
            log_file: None,
            json_format: false,
        }
    }
}

/// Audit log and remembered-path persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable the append-only audit record
    pub enabled: bool,
    /// Audit log path (JSON lines)
    pub log_path: PathBuf,
    /// Per-client remembered browse paths store
    pub remembered_paths_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: PathBuf::from("fleetcp-audit.log"),
            remembered_paths_path: PathBuf::from("fleetcp-paths.json"),
        }
    }
}
