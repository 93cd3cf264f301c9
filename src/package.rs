//! Package requests and their content hash
//!
//! A request is identified by its canonical tag (`[@author/]name@version`).
//! The SHA-1 of the tag is the cache key and the worker's work directory name.
//!
//! Scoped tags keep the `@` and `/` around the scope, so `@ba/belcore` and
//! `@bab/elcore` never share a key. Caches keyed on the bare concatenation
//! `authorname@version` hold different keys for scoped packages; a durable
//! tier shared with such a cache misses on those and rebuilds them. Unscoped
//! keys match.

use crate::error::{BrokerError, BrokerResult};
use sha1::{Digest, Sha1};
use std::fmt;

/// Version spec used when a request names no version
pub const DEFAULT_VERSION: &str = "latest";

/// A request to bundle one package version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    author: Option<String>,
    name: String,
    version_spec: String,
    tag: String,
    hash: String,
}

impl PackageRequest {
    /// Create a request from its parts
    pub fn new(
        author: Option<String>,
        name: impl Into<String>,
        version_spec: impl Into<String>,
    ) -> BrokerResult<Self> {
        let name = name.into();
        let version_spec = version_spec.into();
        let author = author.map(|a| a.trim_start_matches('@').to_string());

        validate_segment("package name", &name)?;
        validate_segment("version", &version_spec)?;
        if let Some(ref author) = author {
            validate_segment("scope", author)?;
        }

        let tag = canonical_tag(author.as_deref(), &name, &version_spec);
        let hash = content_hash(&tag);
        Ok(Self {
            author,
            name,
            version_spec,
            tag,
            hash,
        })
    }

    /// Parse `[@author/]name[@version]`
    pub fn parse(input: &str) -> BrokerResult<Self> {
        let input = input.trim().trim_matches('/');
        let (author, rest) = match input.strip_prefix('@') {
            Some(scoped) => {
                let (scope, rest) = scoped.split_once('/').ok_or_else(|| {
                    BrokerError::InvalidRequest(format!("scoped package without name: {input}"))
                })?;
                (Some(scope.to_string()), rest)
            }
            None => (None, input),
        };

        let (name, version) = match rest.split_once('@') {
            Some((name, version)) if !version.is_empty() => (name, version),
            Some((name, _)) => (name, DEFAULT_VERSION),
            None => (rest, DEFAULT_VERSION),
        };

        Self::new(author, name, version)
    }

    /// Pin the request to a concrete version, recomputing tag and hash
    pub fn resolve_version(&mut self, version: impl Into<String>) {
        self.version_spec = version.into();
        self.tag = canonical_tag(self.author.as_deref(), &self.name, &self.version_spec);
        self.hash = content_hash(&self.tag);
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_spec(&self) -> &str {
        &self.version_spec
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Registry document path, e.g. `@babel%2fcore` or `lodash`
    pub fn registry_path(&self) -> String {
        match self.author {
            Some(ref author) => format!("@{}%2f{}", author, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)
    }
}

/// Lowercase hex SHA-1 of a canonical tag
pub fn content_hash(tag: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(tag.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_tag(author: Option<&str>, name: &str, version: &str) -> String {
    match author {
        Some(author) => format!("@{author}/{name}@{version}"),
        None => format!("{name}@{version}"),
    }
}

fn validate_segment(what: &str, value: &str) -> BrokerResult<()> {
    if value.is_empty() {
        return Err(BrokerError::InvalidRequest(format!("empty {what}")));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '\\' || c.is_control())
    {
        return Err(BrokerError::InvalidRequest(format!(
            "invalid character in {what}: '{value}'"
        )));
    }
    if value == "." || value == ".." {
        return Err(BrokerError::InvalidRequest(format!("invalid {what}: '{value}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_sha1_of_tag() {
        let request = PackageRequest::parse("lodash@4.17.21").unwrap();
        assert_eq!(request.tag(), "lodash@4.17.21");
        assert_eq!(request.hash(), content_hash("lodash@4.17.21"));
        assert_eq!(request.hash().len(), 40);
    }

    #[test]
    fn equal_tags_share_a_hash() {
        let parsed = PackageRequest::parse("lodash@4.17.21").unwrap();
        let built = PackageRequest::new(None, "lodash", "4.17.21").unwrap();
        assert_eq!(parsed.tag(), built.tag());
        assert_eq!(parsed.hash(), built.hash());
    }

    #[test]
    fn known_sha1_digest() {
        // sha1("abc")
        assert_eq!(content_hash("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn parse_defaults_to_latest() {
        let request = PackageRequest::parse("react").unwrap();
        assert_eq!(request.version_spec(), DEFAULT_VERSION);
        assert_eq!(request.tag(), "react@latest");

        let request = PackageRequest::parse("react@").unwrap();
        assert_eq!(request.version_spec(), DEFAULT_VERSION);
    }

    #[test]
    fn parse_scoped_package() {
        let request = PackageRequest::parse("@babel/core@7.24.0").unwrap();
        assert_eq!(request.author(), Some("babel"));
        assert_eq!(request.name(), "core");
        assert_eq!(request.tag(), "@babel/core@7.24.0");
        assert_eq!(request.registry_path(), "@babel%2fcore");
    }

    #[test]
    fn scoped_tags_keep_the_separator() {
        let a = PackageRequest::parse("@ba/belcore@1.0.0").unwrap();
        let b = PackageRequest::parse("@bab/elcore@1.0.0").unwrap();
        assert_eq!(a.tag(), "@ba/belcore@1.0.0");
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), content_hash("@ba/belcore@1.0.0"));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(PackageRequest::parse("").is_err());
        assert!(PackageRequest::parse("@babel").is_err());
        assert!(PackageRequest::parse("bad name@1.0.0").is_err());
        assert!(PackageRequest::parse("..@1.0.0").is_err());
    }

    #[test]
    fn resolve_version_rehashes() {
        let mut request = PackageRequest::parse("lodash").unwrap();
        let before = request.hash().to_string();

        request.resolve_version("4.17.21");

        assert_eq!(request.tag(), "lodash@4.17.21");
        assert_ne!(request.hash(), before);
        assert_eq!(request.hash(), content_hash("lodash@4.17.21"));
    }
}
