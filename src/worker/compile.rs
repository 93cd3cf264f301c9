//! Browser bundle compilation
//!
//! Drives an esbuild-compatible CLI:
//!
//! ```text
//! esbuild <entry> --bundle --format=iife --global-name=<lib> --platform=browser \
//!     --outfile=<out> --log-level=error
//! ```

use crate::worker::output::{stream_child_output, tail_lines};
use crate::worker::BuildError;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Output file written inside the package directory
const OUTPUT_FILE: &str = "bundle-output.js";

/// Global name used when the package name yields no identifier
pub const FALLBACK_LIBRARY: &str = "_u";

#[derive(Debug, Clone)]
pub struct Bundler {
    program: String,
}

impl Bundler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Bundle `entry` (relative to `package_dir`) into one browser script
    pub async fn compile(
        &self,
        package_dir: &Path,
        entry: &str,
        library: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Result<String, BuildError> {
        let entry_path = resolve_entry(package_dir, entry).await?;
        let out_path = package_dir.join(OUTPUT_FILE);

        let mut child = Command::new(&self.program)
            .arg(&entry_path)
            .args([
                "--bundle".to_string(),
                "--format=iife".to_string(),
                format!("--global-name={library}"),
                "--platform=browser".to_string(),
                "--main-fields=browser,module,main".to_string(),
                "--define:process.env.NODE_ENV=\"production\"".to_string(),
                format!("--outfile={}", out_path.display()),
                "--log-level=error".to_string(),
                "--color=false".to_string(),
            ])
            .current_dir(package_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Bundler {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let output = stream_child_output(&mut child, on_output).await;
        let status = child.wait().await.map_err(|e| BuildError::Bundler {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        if !status.success() {
            let mut diagnostics = diagnostics(&output);
            if diagnostics.is_empty() {
                diagnostics.push(format!("{} exited with {}", self.program, status));
            }
            return Err(BuildError::Compile { diagnostics });
        }

        tokio::fs::read_to_string(&out_path)
            .await
            .map_err(|e| BuildError::Bundler {
                program: self.program.clone(),
                reason: format!("reading {}: {}", out_path.display(), e),
            })
    }
}

/// Path of the manifest's entry file, confined to `package_dir`.
///
/// The entry is normalized lexically first, so `lib/../index.js` passes and
/// `../../etc/passwd` or an absolute path does not. An entry that exists is
/// also checked after resolving symlinks.
async fn resolve_entry(package_dir: &Path, entry: &str) -> Result<PathBuf, BuildError> {
    let outside = || BuildError::EntryOutsidePackage(entry.to_string());

    let mut relative = PathBuf::new();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(outside());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(outside());
    }

    let entry_path = package_dir.join(&relative);
    if let (Ok(root), Ok(resolved)) = (
        tokio::fs::canonicalize(package_dir).await,
        tokio::fs::canonicalize(&entry_path).await,
    ) {
        if !resolved.starts_with(&root) {
            return Err(outside());
        }
    }
    Ok(entry_path)
}

/// Error lines from bundler output, or the output tail when none are tagged
fn diagnostics(output: &[String]) -> Vec<String> {
    let tagged: Vec<String> = output
        .iter()
        .filter(|line| line.contains("[ERROR]") || line.trim_start().starts_with("error:"))
        .map(|line| line.trim().to_string())
        .collect();

    if tagged.is_empty() {
        tail_lines(output)
    } else {
        tagged
    }
}

/// JavaScript identifier for a package name.
///
/// `@scope/my-lib.js` becomes `scopeMyLibJs`; a name with no identifier
/// characters falls back to `_u`.
pub fn library_name(package_name: &str) -> String {
    let mut name = String::new();
    let mut upper_next = false;

    for c in package_name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
            if upper_next && !name.is_empty() {
                name.push(c.to_ascii_uppercase());
            } else {
                name.push(c);
            }
            upper_next = false;
        } else {
            upper_next = true;
        }
    }

    match name.chars().next() {
        None => FALLBACK_LIBRARY.to_string(),
        Some(first) if first.is_ascii_digit() => format!("_{name}"),
        Some(_) => name,
    }
}
