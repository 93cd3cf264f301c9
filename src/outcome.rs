//! Build outcomes and the fixed failure reasons

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reasons shared by the worker, the coordinator and renderers
pub mod reason {
    pub const TIMED_OUT: &str = "timed out";
    pub const WORKER_ERROR: &str = "worker error";
    pub const INVALID_VERSION: &str = "invalid version";
    pub const PACKAGE_NOT_FOUND: &str = "package not found";
    pub const FETCH_FAILED: &str = "fetch failed";
    pub const MANIFEST_CORRUPT: &str = "manifest corrupt";
    pub const NO_ENTRY_POINT: &str = "no entry point";
    pub const INSTALL_FAILED: &str = "install failed";
    pub const COMPILE_FAILED: &str = "compile failed";
}

/// Terminal error of one build attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFailure {
    pub reason: String,
    #[serde(default)]
    pub detail: Vec<String>,
}

impl BuildFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            detail: Vec::new(),
        }
    }

    pub fn with_detail(mut self, line: impl Into<String>) -> Self {
        self.detail.push(line.into());
        self
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(first) = self.detail.first() {
            write!(f, ": {}", first)?;
        }
        Ok(())
    }
}

/// Where a bundled script came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptSource {
    Cache,
    Build,
}

/// Result of `Coordinator::build`; exactly one per attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Bundled { script: String, source: ScriptSource },
    Failed { reason: String, detail: Vec<String> },
}

impl BuildOutcome {
    pub fn failed(failure: BuildFailure) -> Self {
        Self::Failed {
            reason: failure.reason,
            detail: failure.detail,
        }
    }

    pub fn is_bundled(&self) -> bool {
        matches!(self, Self::Bundled { .. })
    }

    pub fn script(&self) -> Option<&str> {
        match self {
            Self::Bundled { script, .. } => Some(script),
            Self::Failed { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Bundled { .. } => None,
            Self::Failed { reason, .. } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_includes_first_detail() {
        let failure = BuildFailure::new(reason::COMPILE_FAILED)
            .with_detail("index.js:1: unexpected token")
            .with_detail("second");
        assert_eq!(failure.to_string(), "compile failed: index.js:1: unexpected token");
        assert_eq!(BuildFailure::new(reason::TIMED_OUT).to_string(), "timed out");
    }

    #[test]
    fn outcome_accessors() {
        let ok = BuildOutcome::Bundled {
            script: "x".to_string(),
            source: ScriptSource::Build,
        };
        assert!(ok.is_bundled());
        assert_eq!(ok.script(), Some("x"));
        assert_eq!(ok.reason(), None);

        let failed = BuildOutcome::failed(BuildFailure::new(reason::INSTALL_FAILED));
        assert_eq!(failed.reason(), Some("install failed"));
        assert_eq!(failed.script(), None);
    }
}
