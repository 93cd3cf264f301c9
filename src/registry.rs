//! Registry metadata and version resolution
//!
//! The broker needs only two things from the registry: the package document
//! (`versions` + `dist-tags`) and, from it, a concrete version whose tarball
//! the worker downloads.

use crate::config::schema::RegistryConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::package::PackageRequest;
use async_trait::async_trait;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Upper bound for a package document (some packages publish thousands of versions)
const MAX_METADATA_BYTES: u64 = 64 * 1024 * 1024;

/// Package document as served by the registry, reduced to what builds need
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMetadata>,

    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub dist: Dist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    pub tarball: String,
}

impl RegistryMetadata {
    /// Tarball URL for a concrete version
    pub fn tarball_url(&self, version: &str) -> Option<&str> {
        self.versions.get(version).map(|v| v.dist.tarball.as_str())
    }
}

/// Resolve a version spec against a package document.
///
/// Order: exact published version, then dist-tag, then the highest
/// published version satisfying a range. Bare partial versions follow npm
/// (`16.8` is `16.8.x`).
pub fn resolve_version(metadata: &RegistryMetadata, spec: &str) -> Option<String> {
    let spec = spec.trim();

    if let Some(exact) = clean_version(spec) {
        let exact = exact.to_string();
        if metadata.versions.contains_key(&exact) {
            return Some(exact);
        }
    }

    if let Some(tagged) = metadata.dist_tags.get(spec) {
        if let Some(version) = clean_version(tagged) {
            let version = version.to_string();
            if metadata.versions.contains_key(&version) {
                return Some(version);
            }
        }
    }

    let req = npm_range(spec)?;
    metadata
        .versions
        .keys()
        .filter_map(|v| Version::parse(v).ok())
        .filter(|v| req.matches(v))
        .max()
        .map(|v| v.to_string())
}

/// Parse a range with npm's meaning for bare versions.
///
/// npm reads `16.8` as `16.8.x` and `1.2.3` as exactly that version, where
/// the `semver` crate would read both as caret ranges.
fn npm_range(spec: &str) -> Option<VersionReq> {
    let bare = spec.strip_prefix('v').unwrap_or(spec);
    let core = bare.split(['-', '+']).next().unwrap_or(bare);
    let parts: Vec<&str> = core.split('.').collect();
    let is_bare = (1..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));

    if is_bare {
        VersionReq::parse(&format!("={bare}")).ok()
    } else {
        VersionReq::parse(spec).ok()
    }
}

fn clean_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('=').trim_start_matches('v');
    Version::parse(trimmed).ok()
}

/// Source of package documents
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch the package document; `Ok(None)` when the package does not exist
    async fn metadata(&self, request: &PackageRequest) -> BrokerResult<Option<RegistryMetadata>>;
}

/// Registry client speaking plain HTTP GET
pub struct HttpRegistry {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn document_url(&self, request: &PackageRequest) -> String {
        format!("{}/{}", self.base_url, request.registry_path())
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn metadata(&self, request: &PackageRequest) -> BrokerResult<Option<RegistryMetadata>> {
        let url = self.document_url(request);
        let agent = self.agent.clone();
        debug!("Fetching registry document {}", url);

        let fetch_url = url.clone();
        let body = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
            match agent.get(&fetch_url).call() {
                Ok(mut response) => response
                    .body_mut()
                    .with_config()
                    .limit(MAX_METADATA_BYTES)
                    .read_to_string()
                    .map(Some)
                    .map_err(|e| e.to_string()),
                Err(ureq::Error::StatusCode(404)) => Ok(None),
                Err(e) => Err(e.to_string()),
            }
        })
        .await
        .map_err(|e| BrokerError::Internal(format!("registry task failed: {e}")))?
        .map_err(|reason| BrokerError::Registry {
            url: url.clone(),
            reason,
        })?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
}
