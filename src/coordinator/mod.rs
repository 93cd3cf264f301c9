//! Build coordinator
//!
//! Serves a request from the cache or drives one worker through a build:
//!
//! ```text
//! spawn ─▶ READY ─▶ send BUNDLE, arm deadline ─▶ LOG* ─▶ BUNDLED | FAILED
//!                                                   └──▶ deadline: kill, "timed out"
//! ```
//!
//! Every branch that spawned a worker terminates it exactly once.

pub mod process;

pub use process::{ChildWorker, ProcessSpawner};

use crate::cache::TieredCache;
use crate::config::schema::WorkerConfig;
use crate::error::BrokerResult;
use crate::outcome::{reason, BuildFailure, BuildOutcome, ScriptSource};
use crate::package::PackageRequest;
use crate::protocol::{BundleJob, Instruction, ProtocolError, WorkerEvent};
use crate::registry::RegistryMetadata;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Starts build workers
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self) -> BrokerResult<Box<dyn WorkerProcess>>;
}

/// Coordinator-side handle of one running worker
#[async_trait]
pub trait WorkerProcess: Send {
    /// Next event; `Ok(None)` once the worker closed its channel
    async fn recv(&mut self) -> Result<Option<WorkerEvent>, ProtocolError>;

    async fn send(&mut self, instruction: &Instruction) -> Result<(), ProtocolError>;

    /// Forcibly stop the worker and everything it started; repeat calls are no-ops
    async fn terminate(&mut self);
}

pub struct Coordinator {
    cache: Arc<TieredCache>,
    spawner: Box<dyn WorkerSpawner>,
    deadline: Duration,
    startup_timeout: Duration,
}

impl Coordinator {
    pub fn new(cache: Arc<TieredCache>, spawner: Box<dyn WorkerSpawner>, config: &WorkerConfig) -> Self {
        Self {
            cache,
            spawner,
            deadline: config.deadline(),
            startup_timeout: config.startup_timeout(),
        }
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Produce the script for a resolved request.
    ///
    /// Never returns an error: every failure is a `BuildOutcome::Failed`.
    pub async fn build(&self, request: &PackageRequest, metadata: &RegistryMetadata) -> BuildOutcome {
        let hash = request.hash();

        if let Some(script) = self.cache.get(hash).await {
            debug!("Serving {} from cache", request.tag());
            return BuildOutcome::Bundled {
                script,
                source: ScriptSource::Cache,
            };
        }

        let mut worker = match self.spawner.spawn().await {
            Ok(worker) => worker,
            Err(e) => {
                warn!("Failed to start worker for {}: {}", request.tag(), e);
                return BuildOutcome::failed(
                    BuildFailure::new(reason::WORKER_ERROR).with_detail(e.to_string()),
                );
            }
        };

        info!("Building {}", request.tag());
        let job = BundleJob {
            hash: hash.to_string(),
            registry_metadata: metadata.clone(),
            resolved_version: request.version_spec().to_string(),
        };
        let outcome = self.drive(worker.as_mut(), &job).await;
        worker.terminate().await;

        match outcome {
            Ok(script) => {
                if !self.cache.set(hash, &script).await {
                    debug!("No cache tier configured; {} not stored", request.tag());
                }
                info!("Built {} ({} bytes)", request.tag(), script.len());
                BuildOutcome::Bundled {
                    script,
                    source: ScriptSource::Build,
                }
            }
            Err(failure) => {
                warn!("Build of {} failed: {}", request.tag(), failure);
                BuildOutcome::failed(failure)
            }
        }
    }

    /// Feed the worker its job and wait for a terminal event or the deadline
    async fn drive(&self, worker: &mut dyn WorkerProcess, job: &BundleJob) -> Result<String, BuildFailure> {
        let startup_limit = instant_after(self.startup_timeout);
        let mut deadline: Option<Instant> = None;

        loop {
            let limit = deadline.unwrap_or(startup_limit);
            let event = tokio::select! {
                event = worker.recv() => event,
                _ = tokio::time::sleep_until(limit) => {
                    return Err(match deadline {
                        Some(_) => BuildFailure::new(reason::TIMED_OUT),
                        None => worker_error(format!(
                            "worker not ready after {}s",
                            self.startup_timeout.as_secs()
                        )),
                    });
                }
            };

            match event {
                Ok(Some(WorkerEvent::Ready)) if deadline.is_none() => {
                    worker
                        .send(&Instruction::Bundle(job.clone()))
                        .await
                        .map_err(|e| worker_error(format!("sending build instruction: {e}")))?;
                    deadline = Some(instant_after(self.deadline));
                }
                Ok(Some(WorkerEvent::Ready)) => debug!("Ignoring repeated READY"),
                Ok(Some(WorkerEvent::Log { message })) => debug!("{}", message),
                Ok(Some(WorkerEvent::Bundled { result })) if deadline.is_some() => return Ok(result),
                Ok(Some(WorkerEvent::Bundled { .. })) => {
                    return Err(worker_error("BUNDLED before any build instruction"));
                }
                Ok(Some(WorkerEvent::Failed { error })) => return Err(error),
                Ok(None) => return Err(worker_error("worker exited without a result")),
                Err(e) => return Err(worker_error(e.to_string())),
            }
        }
    }
}

/// Far enough away to never fire during a build
const DISTANT_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, capped for durations that overflow the clock
fn instant_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after.min(DISTANT_FUTURE))
        .unwrap_or(now)
}

fn worker_error(detail: impl Into<String>) -> BuildFailure {
    BuildFailure::new(reason::WORKER_ERROR).with_detail(detail)
}
