//! Configuration schema for bundle-broker
//!
//! Configuration is stored at `~/.config/bundle-broker/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Package registry settings
    pub registry: RegistryConfig,

    /// Build worker settings
    pub worker: WorkerConfig,

    /// Cache settings
    pub cache: CacheConfig,

    /// Output rendering settings
    pub output: OutputConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Package registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry base URL
    pub url: String,

    /// Metadata request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "https://registry.npmjs.org".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Build worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable (empty = this executable)
    pub program: Option<PathBuf>,

    /// Directory holding one work directory per build hash
    pub work_root: PathBuf,

    /// Build deadline in seconds, counted from the worker's READY signal
    pub deadline_secs: u64,

    /// Time allowed between spawn and READY
    pub startup_timeout_secs: u64,

    /// Tarball download timeout in seconds
    pub tarball_timeout_secs: u64,

    /// Forward worker progress lines as LOG events
    pub logs: bool,

    /// Package manager used to install dependencies
    pub package_manager: String,

    /// Arguments passed to the package manager
    pub install_args: Vec<String>,

    /// Bundler executable (esbuild-compatible command line)
    pub bundler: String,
}

impl WorkerConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn tarball_timeout(&self) -> Duration {
        Duration::from_secs(self.tarball_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            work_root: std::env::temp_dir().join("bundle-broker"),
            deadline_secs: 35,
            startup_timeout_secs: 15,
            tarball_timeout_secs: 10,
            logs: true,
            package_manager: "npm".to_string(),
            install_args: vec![
                "install".to_string(),
                "--ignore-scripts".to_string(),
                "--no-audit".to_string(),
                "--no-fund".to_string(),
            ],
            bundler: "esbuild".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// In-memory LRU tier
    pub memory: MemoryCacheConfig,

    /// Durable tier
    pub database: DatabaseConfig,
}

/// In-memory tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    pub enabled: bool,

    /// Maximum number of scripts kept in memory
    pub capacity: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1000,
        }
    }
}

/// Durable tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,

    /// Backend name (known: "filesystem")
    pub driver: String,

    /// Storage location for path-based drivers
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: "filesystem".to_string(),
            path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("bundle-broker")
                .join("scripts"),
        }
    }
}

/// Output rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Replace failures with a script that throws at runtime
    pub substitute_on_fail: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            substitute_on_fail: true,
        }
    }
}
