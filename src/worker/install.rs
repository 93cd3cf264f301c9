//! Dependency installation with the configured package manager

use crate::worker::output::stream_child_output;
use crate::worker::BuildError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Package manager invocation, e.g. `npm install --ignore-scripts`
#[derive(Debug, Clone)]
pub struct Installer {
    program: String,
    args: Vec<String>,
}

impl Installer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Install dependencies in `package_dir`, passing each output line to `on_output`
    pub async fn run(
        &self,
        package_dir: &Path,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> Result<(), BuildError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(package_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Install {
                command: self.command_line(),
                reason: e.to_string(),
            })?;

        // Output is for logs only; it never becomes failure detail
        stream_child_output(&mut child, on_output).await;

        let status = child.wait().await.map_err(|e| BuildError::Install {
            command: self.command_line(),
            reason: e.to_string(),
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Install {
                command: self.command_line(),
                reason: format!("exited with {status}"),
            })
        }
    }
}
