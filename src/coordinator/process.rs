//! Build workers as child processes of this binary
//!
//! The child runs the hidden `worker` subcommand in its own process group.
//! Its stdin/stdout carry protocol frames; stderr is inherited for logs.

use crate::config::schema::WorkerConfig;
use crate::coordinator::{WorkerProcess, WorkerSpawner};
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::{read_message, write_message, Instruction, ProtocolError, WorkerEvent};
use crate::worker::WorkerSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Spawns `<program> [-v…] worker <settings>`
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: PathBuf, settings: &WorkerSettings, verbose: u8) -> Self {
        let mut args: Vec<String> = (0..verbose.min(3)).map(|_| "-v".to_string()).collect();
        args.extend(settings.to_args());
        Self { program, args }
    }

    /// Use `worker.program`, falling back to the running executable
    pub fn from_config(config: &WorkerConfig, verbose: u8) -> BrokerResult<Self> {
        let program = match config.program {
            Some(ref program) if !program.as_os_str().is_empty() => program.clone(),
            _ => std::env::current_exe()
                .map_err(|e| BrokerError::io("locating current executable", e))?,
        };
        Ok(Self::new(program, &WorkerSettings::from_config(config), verbose))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self) -> BrokerResult<Box<dyn WorkerProcess>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Own group so a kill reaches npm and the bundler too
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| BrokerError::WorkerSpawn {
            program: self.program.clone(),
            source: e,
        })?;
        debug!("Spawned worker pid {:?}", child.id());

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::Internal("worker stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::Internal("worker stdout not piped".to_string()))?;

        Ok(Box::new(ChildWorker {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            terminated: false,
        }))
    }
}

/// A running worker process
pub struct ChildWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    terminated: bool,
}

#[async_trait]
impl WorkerProcess for ChildWorker {
    async fn recv(&mut self) -> Result<Option<WorkerEvent>, ProtocolError> {
        match read_message(&mut self.stdout).await {
            Ok(event) => Ok(Some(event)),
            Err(ProtocolError::ConnectionClosed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send(&mut self, instruction: &Instruction) -> Result<(), ProtocolError> {
        let stdin = self.stdin.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        write_message(stdin, instruction).await
    }

    async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stdin = None;

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            if let Ok(pgid) = libc::pid_t::try_from(pid) {
                // SAFETY: signalling a process group we created; no memory is touched
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
            }
        }
        let _ = self.child.start_kill();

        match self.child.wait().await {
            Ok(status) => debug!("Worker exited: {}", status),
            Err(e) => debug!("Failed to reap worker: {}", e),
        }
    }
}
