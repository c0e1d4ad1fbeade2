//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - quiver.toml (default configuration)
//! - quiver.local.toml (git-ignored local overrides)
//! - Environment variables (QUIVER_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # quiver.toml
//! [server]
//! interface = "127.0.0.1:8100"
//! processes = 0           # 0 = one per CPU
//!
//! [engine]
//! slice_budget = 100000
//! soft_timeout_ms = 2000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUIVER_SERVER__INTERFACE=0.0.0.0:8100
//! QUIVER_ENGINE__SLICE_BUDGET=50000
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface address the event loop binds to
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Worker process count; 0 = one per CPU
    #[serde(default)]
    pub processes: usize,

    /// Pidfile location
    #[serde(default = "default_pidfile")]
    pub pidfile: PathBuf,

    /// Epitaph file a crashing worker leaves behind
    #[serde(default = "default_epitaph")]
    pub epitaph_file: PathBuf,

    /// Restart-guard window in seconds
    #[serde(default = "default_restart_window")]
    pub restart_window_secs: u64,

    /// Maximum restarts tolerated inside the window
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
}

/// Store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Ceiling on name+value bytes of one primitive
    #[serde(default = "default_payload_limit")]
    pub payload_limit: usize,

    /// Whether the tile layer is transactional (skips urgent
    /// checkpoints after rollback)
    #[serde(default)]
    pub transactional: bool,
}

/// Query engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Budget units granted per cooperative run slice
    #[serde(default = "default_slice_budget")]
    pub slice_budget: i64,

    /// Soft timeout: resumable reads freeze into cursors past this
    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_ms: u64,

    /// Hard timeout: requests abort past this
    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_ms: u64,

    /// Expected rejections sizing each scan's negative memo
    #[serde(default = "default_bad_cache")]
    pub bad_cache_capacity: usize,

    /// Wall-clock ceiling on a write's commit phase, in milliseconds
    #[serde(default = "default_commit_limit")]
    pub commit_limit_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log file; stderr when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_interface() -> String {
    "127.0.0.1:8100".to_string()
}
fn default_pidfile() -> PathBuf {
    PathBuf::from("./quiver.pid")
}
fn default_epitaph() -> PathBuf {
    PathBuf::from("./quiver.epitaph")
}
fn default_restart_window() -> u64 {
    300
}
fn default_restart_limit() -> u32 {
    3
}
fn default_payload_limit() -> usize {
    1 << 20
}
fn default_slice_budget() -> i64 {
    100_000
}
fn default_soft_timeout() -> u64 {
    2_000
}
fn default_hard_timeout() -> u64 {
    30_000
}
fn default_bad_cache() -> usize {
    4096
}
fn default_commit_limit() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            interface: default_interface(),
            processes: 0,
            pidfile: default_pidfile(),
            epitaph_file: default_epitaph(),
            restart_window_secs: default_restart_window(),
            restart_limit: default_restart_limit(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            payload_limit: default_payload_limit(),
            transactional: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            slice_budget: default_slice_budget(),
            soft_timeout_ms: default_soft_timeout(),
            hard_timeout_ms: default_hard_timeout(),
            bad_cache_capacity: default_bad_cache(),
            commit_limit_ms: default_commit_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. quiver.toml (base configuration)
    /// 2. quiver.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUIVER_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("quiver.toml"))
            .merge(Toml::file("quiver.local.toml"))
            .merge(Env::prefixed("QUIVER_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUIVER_").split("__"))
            .extract()
    }
}
