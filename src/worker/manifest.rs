//! Package manifest handling
//!
//! The manifest is kept as a generic JSON value so unknown fields survive
//! the rewrite untouched.

use crate::worker::BuildError;
use serde_json::{Map, Value};
use std::path::Path;

/// The parts of `package.json` the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: Option<String>,
    pub module: Option<String>,
    pub main: Option<String>,
    pub dependency_count: usize,
}

impl Manifest {
    fn from_value(value: &Value) -> Self {
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            name: field("name"),
            module: field("module"),
            main: field("main"),
            dependency_count: value
                .get("dependencies")
                .and_then(Value::as_object)
                .map_or(0, Map::len),
        }
    }

    /// Entry file relative to the package root; `module` wins over `main`
    pub fn entry_point(&self) -> Option<&str> {
        self.module.as_deref().or(self.main.as_deref())
    }

    pub fn has_dependencies(&self) -> bool {
        self.dependency_count > 0
    }
}

/// Read `package.json`, clear its lifecycle scripts and write it back.
///
/// Install hooks never run on the build host: `scripts` is replaced with an
/// empty object and the file is rewritten with 2-space indentation.
pub async fn sanitize(path: &Path) -> Result<Manifest, BuildError> {
    let corrupt = |reason: String| BuildError::Manifest {
        path: path.to_path_buf(),
        reason,
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| corrupt(e.to_string()))?;
    let mut value: Value = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| corrupt("top level is not an object".to_string()))?;
    object.insert("scripts".to_string(), Value::Object(Map::new()));

    let rewritten = serde_json::to_string_pretty(&value).map_err(|e| corrupt(e.to_string()))?;
    tokio::fs::write(path, rewritten)
        .await
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(Manifest::from_value(&value))
}
