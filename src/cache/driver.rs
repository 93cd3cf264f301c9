//! Durable cache driver abstraction
//!
//! A durable driver stores `{hash, script}` records that survive restarts.
//! The set of drivers is closed; configuration picks one by name.

use crate::cache::filesystem::FilesystemDriver;
use crate::config::schema::DatabaseConfig;
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// Capability surface every durable backend provides
#[async_trait]
pub trait DurableDriver: Send + Sync {
    /// Connect or prepare storage; called once at startup
    async fn init(&mut self) -> BrokerResult<()>;

    async fn has(&self, key: &str) -> BrokerResult<bool>;

    async fn get(&self, key: &str) -> BrokerResult<Option<String>>;

    /// Store a record; `Ok(false)` when the driver declined the write
    async fn set(&self, key: &str, script: &str) -> BrokerResult<bool>;

    /// Number of stored records
    async fn size(&self) -> BrokerResult<u64>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Known durable backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// One JSON record per hash in a local directory
    Filesystem,
}

impl FromStr for DriverKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            other => Err(BrokerError::cache_driver(
                other,
                "unknown driver (known: filesystem)",
            )),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem => write!(f, "filesystem"),
        }
    }
}

/// Create the configured driver, uninitialized
pub fn create_driver(config: &DatabaseConfig) -> BrokerResult<Box<dyn DurableDriver>> {
    match config.driver.parse::<DriverKind>()? {
        DriverKind::Filesystem => Ok(Box::new(FilesystemDriver::new(config.path.clone()))),
    }
}
