//! Per-build work directories
//!
//! Every build attempt gets its own scratch directory under the hash
//! directory, so two workers building the same hash never share files:
//!
//! ```text
//! <work_root>/<hash>/package/               pre-warmed package, if any
//! <work_root>/<hash>/build-<pid>-<n>/
//!     package.tgz                           downloaded tarball
//!     package/                              extracted package (manifest, sources)
//!     package/node_modules/                 installed dependencies
//! ```
//!
//! A pre-warmed package is moved into the first attempt that claims it.

use crate::error::{BrokerError, BrokerResult};
use crate::worker::BuildError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, warn};

/// Attempts within one process
static ATTEMPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A concurrent `remove` may delete the hash directory between the two
/// levels of `create_dir_all`
const ENSURE_ATTEMPTS: usize = 3;

/// Work directory of one build attempt
#[derive(Debug, Clone)]
pub struct WorkDir {
    hash_dir: PathBuf,
    root: PathBuf,
}

impl WorkDir {
    /// Allocate a fresh attempt directory for `hash` under `work_root`
    pub fn for_hash(work_root: &Path, hash: &str) -> Result<Self, BuildError> {
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BuildError::InvalidHash(hash.to_string()));
        }
        let hash_dir = work_root.join(hash);
        let attempt = ATTEMPT_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = hash_dir.join(format!("build-{}-{}", std::process::id(), attempt));
        Ok(Self { hash_dir, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tarball(&self) -> PathBuf {
        self.root.join("package.tgz")
    }

    pub fn package_dir(&self) -> PathBuf {
        self.root.join("package")
    }

    pub fn manifest(&self) -> PathBuf {
        self.package_dir().join("package.json")
    }

    pub fn node_modules(&self) -> PathBuf {
        self.package_dir().join("node_modules")
    }

    /// Where an operator (or an earlier run) leaves an extracted package
    pub fn prewarmed_package(&self) -> PathBuf {
        self.hash_dir.join("package")
    }

    /// Create the attempt directory; succeeds if it already exists
    pub async fn ensure(&self) -> Result<(), BuildError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match fs::create_dir_all(&self.root).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && tries < ENSURE_ATTEMPTS => {
                    debug!("Retrying creation of {}", self.root.display());
                }
                Err(e) => {
                    return Err(BuildError::WorkDir {
                        path: self.root.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Move a pre-warmed package into this attempt.
    ///
    /// Returns false when there is none, or another attempt claimed it first.
    pub async fn claim_prewarmed(&self) -> bool {
        let source = self.prewarmed_package();
        if !is_dir(&source).await {
            return false;
        }
        match fs::rename(&source, self.package_dir()).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Cannot claim {}: {}", source.display(), e);
                false
            }
        }
    }

    /// Remove the attempt directory, and the hash directory once it is empty
    pub async fn remove(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            other => other?,
        }
        // Fails while other attempts or a pre-warmed package remain
        let _ = fs::remove_dir(&self.hash_dir).await;
        Ok(())
    }
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Remove every work directory under `work_root`, returning how many were removed.
///
/// Workers killed mid-build never run their own cleanup; this sweeps up
/// what they leave behind.
pub async fn clean_root(work_root: &Path) -> BrokerResult<usize> {
    if !is_dir(work_root).await {
        return Ok(0);
    }

    let mut entries = fs::read_dir(work_root)
        .await
        .map_err(|e| BrokerError::io(format!("reading {}", work_root.display()), e))?;

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| BrokerError::io("reading work directory entry", e))?
    {
        let path = entry.path();
        let result = if is_dir(&path).await {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| BrokerError::io(format!("removing {}", path.display()), e))?;
        debug!("Removed {}", path.display());
        removed += 1;
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_non_hex_hash() {
        let root = Path::new("/tmp/work");
        assert!(WorkDir::for_hash(root, "../etc").is_err());
        assert!(WorkDir::for_hash(root, "").is_err());
        assert!(WorkDir::for_hash(root, "a9993e36").is_ok());
    }

    #[test]
    fn layout_paths() {
        let dir = WorkDir::for_hash(Path::new("/w"), "abc").unwrap();
        assert!(dir.root().starts_with("/w/abc"));
        assert!(dir
            .root()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("build-"));
        assert_eq!(dir.tarball(), dir.root().join("package.tgz"));
        assert_eq!(dir.manifest(), dir.root().join("package/package.json"));
        assert_eq!(dir.node_modules(), dir.root().join("package/node_modules"));
        assert_eq!(dir.prewarmed_package(), PathBuf::from("/w/abc/package"));
    }

    #[test]
    fn attempts_on_one_hash_do_not_share_a_root() {
        let a = WorkDir::for_hash(Path::new("/w"), "abc").unwrap();
        let b = WorkDir::for_hash(Path::new("/w"), "abc").unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[tokio::test]
    async fn ensure_is_idempotent_and_remove_cleans() {
        let temp = TempDir::new().unwrap();
        let dir = WorkDir::for_hash(temp.path(), "abc").unwrap();

        dir.ensure().await.unwrap();
        dir.ensure().await.unwrap();
        assert!(dir.root().is_dir());

        dir.remove().await.unwrap();
        assert!(!dir.root().exists());
        assert!(!temp.path().join("abc").exists());
        // Removing twice is fine
        dir.remove().await.unwrap();
    }

    #[tokio::test]
    async fn prewarmed_package_is_claimed_once() {
        let temp = TempDir::new().unwrap();
        let first = WorkDir::for_hash(temp.path(), "abc").unwrap();
        let second = WorkDir::for_hash(temp.path(), "abc").unwrap();
        std::fs::create_dir_all(first.prewarmed_package()).unwrap();
        std::fs::write(first.prewarmed_package().join("package.json"), "{}").unwrap();
        first.ensure().await.unwrap();
        second.ensure().await.unwrap();

        assert!(first.claim_prewarmed().await);
        assert!(!second.claim_prewarmed().await);
        assert!(first.manifest().is_file());
        assert!(!second.package_dir().exists());
    }

    #[tokio::test]
    async fn hash_dir_survives_until_last_attempt_leaves() {
        let temp = TempDir::new().unwrap();
        let first = WorkDir::for_hash(temp.path(), "abc").unwrap();
        let second = WorkDir::for_hash(temp.path(), "abc").unwrap();
        first.ensure().await.unwrap();
        second.ensure().await.unwrap();

        first.remove().await.unwrap();
        assert!(second.root().is_dir());

        second.remove().await.unwrap();
        assert!(!temp.path().join("abc").exists());
    }

    #[tokio::test]
    async fn clean_root_removes_everything() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("aa").join("package")).unwrap();
        std::fs::create_dir_all(temp.path().join("bb")).unwrap();
        std::fs::write(temp.path().join("stray.tgz"), "x").unwrap();

        let removed = clean_root(temp.path()).await.unwrap();

        assert_eq!(removed, 3);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn clean_root_missing_dir_is_zero() {
        let temp = TempDir::new().unwrap();
        assert_eq!(clean_root(&temp.path().join("nope")).await.unwrap(), 0);
    }
}
