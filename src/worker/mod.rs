//! Build worker
//!
//! Runs in its own process and builds exactly one package version. It speaks
//! the protocol in [`crate::protocol`] over stdin/stdout and logs to stderr.
//!
//! ```text
//! Ready ──BUNDLE──▶ Building ──▶ Finished
//!                      │
//!   ensure workdir ─▶ fetch ─▶ sanitize ─▶ install ─▶ compile ─▶ cleanup
//! ```
//!
//! A work directory whose `package/` already exists is treated as
//! pre-warmed and the fetch step is skipped.

pub mod compile;
pub mod fetch;
pub mod install;
pub mod manifest;
mod output;
pub mod workdir;

use crate::config::schema::WorkerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::outcome::{reason, BuildFailure};
use crate::protocol::{read_message, write_message, BundleJob, Instruction, ProtocolError, WorkerEvent};
use compile::{library_name, Bundler};
use install::Installer;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use workdir::{is_dir, WorkDir};

/// Pipeline step failures, each mapped to one failure reason
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid build hash '{0}'")]
    InvalidHash(String),

    #[error("failed to prepare {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("version {0} has no tarball in registry metadata")]
    UnknownVersion(String),

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("download of {url} timed out after {secs}s")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("failed to extract {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path} is unusable: {reason}")]
    Manifest { path: PathBuf, reason: String },

    #[error("package {0} does not declare an entry file")]
    NoEntryPoint(String),

    #[error("entry file '{0}' is outside the package directory")]
    EntryOutsidePackage(String),

    #[error("{command}: {reason}")]
    Install { command: String, reason: String },

    #[error("bundler reported {} error(s)", diagnostics.len())]
    Compile { diagnostics: Vec<String> },

    #[error("bundler {program} failed: {reason}")]
    Bundler { program: String, reason: String },
}

impl BuildError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidHash(_) | Self::WorkDir { .. } => reason::WORKER_ERROR,
            Self::UnknownVersion(_)
            | Self::Download { .. }
            | Self::DownloadTimeout { .. }
            | Self::Extract { .. } => reason::FETCH_FAILED,
            Self::Manifest { .. } => reason::MANIFEST_CORRUPT,
            Self::NoEntryPoint(_) | Self::EntryOutsidePackage(_) => reason::NO_ENTRY_POINT,
            Self::Install { .. } => reason::INSTALL_FAILED,
            Self::Compile { .. } | Self::Bundler { .. } => reason::COMPILE_FAILED,
        }
    }

    pub fn into_failure(self) -> BuildFailure {
        let failure = BuildFailure::new(self.reason());
        match self {
            Self::Compile { diagnostics } => BuildFailure {
                detail: diagnostics,
                ..failure
            },
            other => failure.with_detail(other.to_string()),
        }
    }
}

/// Everything a worker process is told on its command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub work_root: PathBuf,
    pub tarball_timeout: Duration,
    pub package_manager: String,
    pub install_args: Vec<String>,
    pub bundler: String,
    pub forward_logs: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_root: config.work_root.clone(),
            tarball_timeout: config.tarball_timeout(),
            package_manager: config.package_manager.clone(),
            install_args: config.install_args.clone(),
            bundler: config.bundler.clone(),
            forward_logs: config.logs,
        }
    }

    /// Arguments for the hidden `worker` subcommand
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--work-root".to_string(),
            self.work_root.display().to_string(),
            "--tarball-timeout-secs".to_string(),
            self.tarball_timeout.as_secs().to_string(),
            "--package-manager".to_string(),
            self.package_manager.clone(),
            "--bundler".to_string(),
            self.bundler.clone(),
        ];
        args.extend(self.install_args.iter().map(|a| format!("--install-arg={a}")));
        if !self.forward_logs {
            args.push("--no-logs".to_string());
        }
        args
    }
}

/// Lifecycle of a worker as seen from its instruction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    Building,
    Finished,
}

impl WorkerState {
    /// Move to `Building` if a build may start; later instructions are refused
    pub fn accept_bundle(&mut self) -> bool {
        if *self == Self::Ready {
            *self = Self::Building;
            true
        } else {
            false
        }
    }
}

/// Progress reporting for one build
struct Reporter {
    events: mpsc::UnboundedSender<WorkerEvent>,
    forward_logs: bool,
    label: String,
}

impl Reporter {
    fn log(&self, message: impl AsRef<str>) {
        let line = format!("[{}]: {}", self.label, message.as_ref());
        debug!("{}", line);
        if self.forward_logs {
            let _ = self.events.send(WorkerEvent::Log { message: line });
        }
    }
}

/// The build pipeline for one job
struct Pipeline<'a> {
    settings: &'a WorkerSettings,
    reporter: Reporter,
}

impl<'a> Pipeline<'a> {
    fn new(settings: &'a WorkerSettings, events: mpsc::UnboundedSender<WorkerEvent>, label: String) -> Self {
        Self {
            settings,
            reporter: Reporter {
                events,
                forward_logs: settings.forward_logs,
                label,
            },
        }
    }

    /// Run every step and produce the terminal event; the workdir is always removed
    async fn run(&mut self, job: &BundleJob) -> WorkerEvent {
        let result = match WorkDir::for_hash(&self.settings.work_root, &job.hash) {
            Ok(workdir) => {
                let result = self.build(&workdir, job).await;
                if let Err(e) = workdir.remove().await {
                    warn!("Failed to remove {}: {}", workdir.root().display(), e);
                }
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(script) => {
                self.reporter.log(format!("Bundled ({} bytes)", script.len()));
                WorkerEvent::Bundled { result: script }
            }
            Err(e) => {
                self.reporter.log(format!("Build failed: {e}"));
                WorkerEvent::Failed {
                    error: e.into_failure(),
                }
            }
        }
    }

    async fn build(&mut self, workdir: &WorkDir, job: &BundleJob) -> Result<String, BuildError> {
        workdir.ensure().await?;

        if workdir.claim_prewarmed().await {
            self.reporter.log("Using pre-warmed work directory");
        } else {
            let url = job
                .registry_metadata
                .tarball_url(&job.resolved_version)
                .ok_or_else(|| BuildError::UnknownVersion(job.resolved_version.clone()))?;
            self.reporter.log(format!("Downloading {url}"));
            fetch::download(url, workdir, self.settings.tarball_timeout).await?;
            self.reporter.log("Extracting tarball");
            fetch::extract(workdir).await?;
        }

        self.reporter.log("Sanitizing package.json");
        let manifest = manifest::sanitize(&workdir.manifest()).await?;
        if let Some(ref name) = manifest.name {
            self.reporter.label = format!("{}@{}", name, job.resolved_version);
        }

        let package_dir = workdir.package_dir();
        let reporter = &self.reporter;
        if is_dir(&workdir.node_modules()).await && !manifest.has_dependencies() {
            reporter.log("Skipping install: node_modules present and no dependencies");
        } else {
            let installer = Installer::new(
                self.settings.package_manager.clone(),
                self.settings.install_args.clone(),
            );
            reporter.log(format!("Installing dependencies ({})", installer.command_line()));
            installer.run(&package_dir, &|line| reporter.log(line)).await?;
        }

        let entry = manifest
            .entry_point()
            .ok_or_else(|| BuildError::NoEntryPoint(reporter.label.clone()))?;
        let library = library_name(manifest.name.as_deref().unwrap_or_default());
        reporter.log(format!("Compiling {entry} as {library}"));
        Bundler::new(self.settings.bundler.clone())
            .compile(&package_dir, entry, &library, &|line| reporter.log(line))
            .await
    }
}

/// Serve one build over `input`/`output`.
///
/// Sends `READY`, waits for a `BUNDLE`, runs the pipeline and sends exactly
/// one `BUNDLED` or `FAILED`. Returns without building if the coordinator
/// closes the channel first.
pub async fn serve<R, W>(settings: WorkerSettings, mut input: R, output: W) -> BrokerResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(rx, output));
    let mut state = WorkerState::Ready;
    let _ = events.send(WorkerEvent::Ready);

    let job = loop {
        match read_message::<Instruction, _>(&mut input).await {
            Ok(Instruction::Bundle(job)) => {
                if state.accept_bundle() {
                    break Some(job);
                }
            }
            Err(ProtocolError::Json(e)) => warn!("Ignoring malformed instruction: {}", e),
            Err(ProtocolError::ConnectionClosed) => {
                debug!("Coordinator closed the channel before sending a build");
                break None;
            }
            Err(e) => {
                drop(events);
                let _ = writer.await;
                return Err(e.into());
            }
        }
    };

    if let Some(job) = job {
        debug!("Building {}@{}", job.hash, job.resolved_version);
        let label = job.hash.chars().take(8).collect();
        let mut pipeline = Pipeline::new(&settings, events.clone(), label);

        let terminal = {
            let build = pipeline.run(&job);
            tokio::pin!(build);
            let mut listening = true;
            loop {
                tokio::select! {
                    event = &mut build => break event,
                    next = read_message::<Instruction, _>(&mut input), if listening => match next {
                        Ok(Instruction::Bundle(extra)) => {
                            if !state.accept_bundle() {
                                warn!("Ignoring BUNDLE for {}: a build is already running", extra.hash);
                            }
                        }
                        Err(ProtocolError::Json(e)) => warn!("Ignoring malformed instruction: {}", e),
                        // The build continues; the coordinator may still be reading
                        Err(_) => listening = false,
                    }
                }
            }
        };

        state = WorkerState::Finished;
        debug!("Worker state: {:?}", state);
        let _ = events.send(terminal);
    }

    drop(events);
    match writer.await {
        Ok(result) => result.map_err(BrokerError::from),
        Err(e) => Err(BrokerError::Internal(format!("event writer panicked: {e}"))),
    }
}

/// Drain events to `output` until the terminal one is written
async fn write_events<W>(
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    mut output: W,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        write_message(&mut output, &event).await?;
        if terminal {
            break;
        }
    }
    output.flush().await?;
    Ok(())
}
