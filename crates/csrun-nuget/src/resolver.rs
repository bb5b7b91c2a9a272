//! Resolution orchestrator.
//!
//! The public entry point of the crate: takes the package references parsed
//! from a script, and produces the flat list of assembly paths the compiler
//! needs. Work is fanned out per package under a download semaphore; callers
//! racing for the same package share one in-flight future, and completed
//! selections are memoized for the life of the resolver (the CLI holds a
//! single resolver per process).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::artifacts;
use crate::cache::{CacheError, PackageCache};
use crate::framework;
use crate::package::{PackageCoord, PackageRef};
use crate::registry::Registry;
use crate::walker::DependencyWalker;

/// Errors that abort a resolution call outright.
///
/// Per-package failures never surface here; they are logged and the package
/// is dropped from the result.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("cache root path is empty")]
    EmptyCacheRoot,

    #[error("failed to initialize cache root '{path}': {source}")]
    CacheInit {
        path: PathBuf,
        #[source]
        source: CacheError,
    },

    #[error("package error: {0}")]
    Cache(#[from] CacheError),
}

type SharedSelection = Shared<BoxFuture<'static, Result<Vec<PathBuf>, Arc<ResolveError>>>>;

/// Resolves script package references to assembly paths.
pub struct ScriptPackageResolver {
    registry: Arc<dyn Registry>,
    cache: Arc<PackageCache>,
    target: String,
    semaphore: Arc<Semaphore>,
    in_flight: DashMap<String, SharedSelection>,
    results: DashMap<String, Vec<PathBuf>>,
}

impl ScriptPackageResolver {
    /// Create a resolver over the given registry and cache root.
    ///
    /// The cache root is created when absent. The download concurrency limit
    /// defaults to the CPU count and the target framework to
    /// [`crate::DEFAULT_TARGET`].
    ///
    /// # Errors
    ///
    /// Returns an error for an empty cache root path or when the root cannot
    /// be created.
    pub fn new(
        registry: Arc<dyn Registry>,
        cache_root: impl AsRef<Path>,
    ) -> Result<Self, ResolveError> {
        let root = cache_root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(ResolveError::EmptyCacheRoot);
        }
        let cache = PackageCache::new(root).map_err(|source| ResolveError::CacheInit {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            registry,
            cache: Arc::new(cache),
            target: framework::DEFAULT_TARGET.to_string(),
            semaphore: Arc::new(Semaphore::new(num_cpus::get())),
            in_flight: DashMap::new(),
            results: DashMap::new(),
        })
    }

    /// Set the target framework moniker.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Set the maximum number of concurrent downloads.
    #[must_use]
    pub fn with_max_downloads(mut self, limit: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// The configured target framework.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The cache root in use.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        self.cache.root()
    }

    /// Resolve package references to a flat list of assembly paths.
    ///
    /// References without a version are bound to the registry's latest;
    /// references whose version cannot be resolved are dropped with a logged
    /// error. The returned paths preserve the breadth-first discovery order
    /// of packages.
    ///
    /// # Errors
    ///
    /// Only setup problems fail the call; see [`ResolveError`].
    pub async fn resolve(&self, refs: &[PackageRef]) -> Result<Vec<PathBuf>, ResolveError> {
        let seeds = self.bind_versions(refs).await;
        let walker = DependencyWalker::new(self.registry.as_ref(), &self.cache, &self.target);
        let coords = walker.walk(seeds).await;

        let selections =
            futures::future::join_all(coords.iter().map(|coord| self.artifact_paths(coord))).await;

        let mut paths: Vec<PathBuf> = Vec::new();
        for (coord, selection) in coords.iter().zip(selections) {
            match selection {
                Ok(selected) => {
                    for path in selected {
                        if !paths.contains(&path) {
                            paths.push(path);
                        }
                    }
                }
                Err(e) => {
                    warn!(package = %coord, error = %e, "skipping package");
                }
            }
        }
        Ok(paths)
    }

    /// Bind versionless references against the registry.
    async fn bind_versions(&self, refs: &[PackageRef]) -> Vec<PackageCoord> {
        let mut seeds = Vec::with_capacity(refs.len());
        for package_ref in refs {
            match &package_ref.version {
                Some(version) => seeds.push(PackageCoord::new(&package_ref.id, version)),
                None => match self.registry.latest_version(&package_ref.id).await {
                    Ok(version) => {
                        debug!(package = %package_ref.id, %version, "bound to latest version");
                        seeds.push(PackageCoord::new(&package_ref.id, version));
                    }
                    Err(e) => {
                        warn!(package = %package_ref.id, error = %e, "dropping reference");
                    }
                },
            }
        }
        seeds
    }

    /// Fetch-extract-select for one package, deduplicated and memoized.
    async fn artifact_paths(
        &self,
        coord: &PackageCoord,
    ) -> Result<Vec<PathBuf>, Arc<ResolveError>> {
        let key = format!(
            "{}|{}|{}",
            coord.cache_key(),
            self.cache.root().display(),
            self.target
        );

        if let Some(hit) = self.results.get(&key) {
            return Ok(hit.clone());
        }

        let shared = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| self.selection_future(coord))
            .value()
            .clone();

        let result = shared.await;
        match &result {
            Ok(paths) => {
                self.results.insert(key.clone(), paths.clone());
            }
            Err(_) => {
                // Failures are per-call: evict so a later call can retry.
            }
        }
        self.in_flight.remove(&key);
        result
    }

    /// The actual work future behind one in-flight handle.
    fn selection_future(&self, coord: &PackageCoord) -> SharedSelection {
        let registry = Arc::clone(&self.registry);
        let cache = Arc::clone(&self.cache);
        let semaphore = Arc::clone(&self.semaphore);
        let target = self.target.clone();
        let coord = coord.clone();

        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("download semaphore is never closed");
            let dir = cache
                .ensure_cached(&coord.id, &coord.version, registry.as_ref())
                .await
                .map_err(|e| Arc::new(ResolveError::Cache(e)))?;
            Ok(artifacts::select_artifacts(&dir, &target))
        }
        .boxed()
        .shared()
    }
}
