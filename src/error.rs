//! Error types for bundle-broker
//!
//! All modules use `BrokerResult<T>` as their return type. Build pipeline
//! failures have their own type (`worker::BuildError`) because they never
//! cross the process boundary as errors, only as `Failed` events.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// All errors that can occur outside the build pipeline
#[derive(Error, Debug)]
pub enum BrokerError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Request errors
    #[error("Invalid package request: {0}")]
    InvalidRequest(String),

    // Registry errors
    #[error("Registry request failed for {url}: {reason}")]
    Registry { url: String, reason: String },

    // Cache errors
    #[error("Cache driver {driver} failed: {reason}")]
    CacheDriver { driver: String, reason: String },

    // Worker errors
    #[error("Failed to spawn worker {program}: {source}")]
    WorkerSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl BrokerError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a durable cache driver error
    pub fn cache_driver(driver: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheDriver {
            driver: driver.into(),
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: bundle-broker config init --force"),
            Self::InvalidRequest(_) => Some("Expected [@scope/]name[@version], e.g. lodash@4.17.21"),
            Self::WorkerSpawn { .. } => Some("Check worker.program in the configuration"),
            _ => None,
        }
    }
}
