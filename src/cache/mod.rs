//! Tiered script cache
//!
//! Maps content hashes to bundled scripts across two tiers:
//!
//! | Tier | Bounded | Survives restart | May be absent |
//! |------|---------|------------------|---------------|
//! | Memory (LRU) | yes | no | yes (config) |
//! | Durable (driver) | no | yes | yes |
//!
//! Reads try memory, then durable. A durable hit is not copied back into
//! memory. Writes go to both tiers; a durable write failure is logged and
//! the entry stays memory-only. The cache never surfaces an error.

pub mod driver;
pub mod filesystem;
pub mod memory;

pub use driver::{create_driver, DriverKind, DurableDriver};
pub use filesystem::FilesystemDriver;
pub use memory::MemoryTier;

use crate::config::schema::{CacheConfig, MemoryCacheConfig};
use tracing::{debug, info, warn};

pub struct TieredCache {
    memory: Option<MemoryTier>,
    durable: Option<Box<dyn DurableDriver>>,
}

impl TieredCache {
    /// Build both tiers from configuration, initializing the durable driver.
    ///
    /// A driver that is unknown or fails to initialize disables the durable
    /// tier for the lifetime of this cache.
    pub async fn init(config: &CacheConfig) -> Self {
        let driver = if config.database.enabled {
            debug!("Durable cache enabled (driver: {})", config.database.driver);
            match create_driver(&config.database) {
                Ok(driver) => Some(driver),
                Err(e) => {
                    warn!("{}, continuing without durable cache", e);
                    None
                }
            }
        } else {
            None
        };

        Self::with_driver(&config.memory, driver).await
    }

    /// Build the cache around an explicit driver
    pub async fn with_driver(
        memory: &MemoryCacheConfig,
        driver: Option<Box<dyn DurableDriver>>,
    ) -> Self {
        let memory = if memory.enabled {
            debug!("Memory cache enabled (capacity: {})", memory.capacity);
            Some(MemoryTier::new(memory.capacity))
        } else {
            None
        };

        let durable = match driver {
            Some(mut driver) => match driver.init().await {
                Ok(()) => {
                    info!("Durable cache driver {} initialized", driver.name());
                    Some(driver)
                }
                Err(e) => {
                    warn!(
                        "Durable cache driver {} failed to initialize: {}; continuing without durable cache",
                        driver.name(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Self { memory, durable }
    }

    /// Memory-only cache (no durable tier)
    pub fn memory_only(capacity: usize) -> Self {
        Self {
            memory: Some(MemoryTier::new(capacity)),
            durable: None,
        }
    }

    pub fn durable_enabled(&self) -> bool {
        self.durable.is_some()
    }

    /// True if either tier holds the key
    pub async fn has(&self, key: &str) -> bool {
        if self.memory.as_ref().is_some_and(|m| m.contains(key)) {
            return true;
        }
        self.durable_has(key).await
    }

    /// Memory lookup first, durable on miss
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(script) = self.memory.as_ref().and_then(|m| m.get(key)) {
            debug!("Cache hit (memory): {}", key);
            return Some(script);
        }
        self.durable_get(key).await
    }

    /// Write through both tiers; durable failures degrade to memory-only.
    ///
    /// Returns false only when no tier is configured at all.
    pub async fn set(&self, key: &str, script: &str) -> bool {
        if self.memory.is_none() && self.durable.is_none() {
            return false;
        }

        if let Some(ref memory) = self.memory {
            if let Some(evicted) = memory.insert(key, script) {
                debug!("Evicted {} from memory cache", evicted);
            }
        }

        if let Some(ref driver) = self.durable {
            match driver.set(key, script).await {
                Ok(true) => debug!("Stored {} in {} cache", key, driver.name()),
                Ok(false) => warn!("Driver {} declined write for {}; memory only", driver.name(), key),
                Err(e) => warn!("Durable write for {} failed: {}; memory only", key, e),
            }
        }

        true
    }

    /// Entries in the memory tier
    pub fn size(&self) -> usize {
        self.memory.as_ref().map_or(0, MemoryTier::len)
    }

    /// Records in the durable tier; 0 when absent or erroring
    pub async fn database_size(&self) -> u64 {
        let Some(ref driver) = self.durable else {
            return 0;
        };
        match driver.size().await {
            Ok(size) => size,
            Err(e) => {
                warn!("Durable size query failed: {}", e);
                0
            }
        }
    }

    async fn durable_has(&self, key: &str) -> bool {
        let Some(ref driver) = self.durable else {
            return false;
        };
        match driver.has(key).await {
            Ok(found) => {
                debug!("Durable has {}: {}", key, found);
                found
            }
            Err(e) => {
                warn!("Durable lookup for {} failed: {}", key, e);
                false
            }
        }
    }

    async fn durable_get(&self, key: &str) -> Option<String> {
        let driver = self.durable.as_ref()?;
        match driver.get(key).await {
            Ok(found) => {
                debug!("Durable get {}: {}", key, found.is_some());
                found
            }
            Err(e) => {
                warn!("Durable read for {} failed: {}", key, e);
                None
            }
        }
    }
}
