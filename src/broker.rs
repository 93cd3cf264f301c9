//! Request entry point: registry lookup, version resolution, build

use crate::cache::TieredCache;
use crate::config::Config;
use crate::coordinator::{Coordinator, ProcessSpawner};
use crate::error::BrokerResult;
use crate::outcome::{reason, BuildFailure, BuildOutcome, ScriptSource};
use crate::package::PackageRequest;
use crate::registry::{resolve_version, HttpRegistry, Registry};
use semver::Version;
use std::sync::Arc;
use tracing::{debug, warn};

/// A served request: the request as resolved, and its outcome
#[derive(Debug, Clone)]
pub struct Fetched {
    pub request: PackageRequest,
    pub outcome: BuildOutcome,
}

pub struct Broker {
    registry: Box<dyn Registry>,
    coordinator: Coordinator,
}

impl Broker {
    pub fn new(registry: Box<dyn Registry>, coordinator: Coordinator) -> Self {
        Self {
            registry,
            coordinator,
        }
    }

    /// Wire the HTTP registry, the configured cache tiers and process workers
    pub async fn from_config(config: &Config, verbose: u8) -> BrokerResult<Self> {
        let cache = Arc::new(TieredCache::init(&config.cache).await);
        let spawner = ProcessSpawner::from_config(&config.worker, verbose)?;
        debug!("Worker program: {}", spawner.program().display());
        let coordinator = Coordinator::new(cache, Box::new(spawner), &config.worker);
        Ok(Self::new(Box::new(HttpRegistry::new(&config.registry)), coordinator))
    }

    /// Serve a package request end to end.
    ///
    /// An exact version that is already cached skips the registry. Unknown
    /// packages and unresolvable versions fail without starting a worker.
    pub async fn fetch_package(&self, mut request: PackageRequest) -> Fetched {
        if is_exact_version(request.version_spec()) {
            if let Some(script) = self.coordinator.cache().get(request.hash()).await {
                debug!("Serving {} from cache without registry lookup", request.tag());
                return Fetched {
                    request,
                    outcome: BuildOutcome::Bundled {
                        script,
                        source: ScriptSource::Cache,
                    },
                };
            }
        }

        let metadata = match self.registry.metadata(&request).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                return Fetched {
                    request,
                    outcome: BuildOutcome::failed(BuildFailure::new(reason::PACKAGE_NOT_FOUND)),
                };
            }
            Err(e) => {
                warn!("Registry lookup for {} failed: {}", request.tag(), e);
                return Fetched {
                    request,
                    outcome: BuildOutcome::failed(
                        BuildFailure::new(reason::FETCH_FAILED).with_detail(e.to_string()),
                    ),
                };
            }
        };

        let Some(version) = resolve_version(&metadata, request.version_spec()) else {
            let failure = BuildFailure::new(reason::INVALID_VERSION)
                .with_detail(format!("no version of {} matches '{}'", request.name(), request.version_spec()));
            return Fetched {
                request,
                outcome: BuildOutcome::failed(failure),
            };
        };

        debug!("Resolved {} to {}", request.tag(), version);
        request.resolve_version(version);
        let outcome = self.coordinator.build(&request, &metadata).await;
        Fetched { request, outcome }
    }
}

/// Whether `spec` names one version in canonical form
fn is_exact_version(spec: &str) -> bool {
    Version::parse(spec).is_ok_and(|v| v.to_string() == spec)
}
