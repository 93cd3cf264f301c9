//! Filesystem durable driver
//!
//! Stores each record as `<root>/<hash>.json` holding `{"hash", "script"}`.
//! Writes go through a temporary file and a rename so readers never see a
//! partial record.

use crate::cache::driver::DurableDriver;
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Distinguishes temporary files of concurrent writes within one process
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persisted record layout
#[derive(Debug, Serialize, Deserialize)]
struct ScriptRecord {
    hash: String,
    script: String,
}

pub struct FilesystemDriver {
    root: PathBuf,
    ready: bool,
}

impl FilesystemDriver {
    pub fn new(root: PathBuf) -> Self {
        Self { root, ready: false }
    }

    fn record_path(&self, key: &str) -> BrokerResult<PathBuf> {
        // Keys are hex digests; anything else could escape the root
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BrokerError::cache_driver(
                self.name(),
                format!("invalid key '{key}'"),
            ));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl DurableDriver for FilesystemDriver {
    async fn init(&mut self) -> BrokerResult<()> {
        if self.ready {
            return Err(BrokerError::cache_driver(self.name(), "already initialized"));
        }

        fs::create_dir_all(&self.root).await.map_err(|e| {
            BrokerError::io(format!("creating cache directory {}", self.root.display()), e)
        })?;

        // Fail at startup rather than on the first write
        let marker = self.root.join(".writable");
        fs::write(&marker, b"ok")
            .await
            .map_err(|e| BrokerError::io(format!("writing to {}", self.root.display()), e))?;
        let _ = fs::remove_file(&marker).await;

        self.ready = true;
        debug!("Filesystem cache driver ready at {}", self.root.display());
        Ok(())
    }

    async fn has(&self, key: &str) -> BrokerResult<bool> {
        if !self.ready {
            return Ok(false);
        }
        let path = self.record_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn get(&self, key: &str) -> BrokerResult<Option<String>> {
        if !self.ready {
            return Ok(None);
        }
        let path = self.record_path(key)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BrokerError::io(format!("reading {}", path.display()), e));
            }
        };

        let record: ScriptRecord = serde_json::from_str(&content)?;
        if record.hash != key {
            return Err(BrokerError::cache_driver(
                self.name(),
                format!("record {} holds hash {}", path.display(), record.hash),
            ));
        }
        Ok(Some(record.script))
    }

    async fn set(&self, key: &str, script: &str) -> BrokerResult<bool> {
        if !self.ready {
            return Ok(false);
        }
        let path = self.record_path(key)?;
        let record = ScriptRecord {
            hash: key.to_string(),
            script: script.to_string(),
        };
        let content = serde_json::to_vec(&record)?;

        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{}.{}.{}.tmp", key, std::process::id(), seq));
        fs::write(&tmp, content)
            .await
            .map_err(|e| BrokerError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| BrokerError::io(format!("committing {}", path.display()), e))?;

        Ok(true)
    }

    async fn size(&self) -> BrokerResult<u64> {
        if !self.ready {
            return Ok(0);
        }

        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| BrokerError::io("reading cache directory", e))?;

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BrokerError::io("reading cache entry", e))?
        {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if is_record {
                count += 1;
            }
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}
