//! Breadth-first transitive dependency walk.
//!
//! Starting from the script's bound references, the walker visits each
//! `(id, version)` coordinate at most once, reads the cached package's
//! manifest, keeps the dependency groups compatible with the target, and
//! enqueues what it finds. First arrival wins: a package reached through two
//! paths keeps the version seen first.
//!
//! Failures are contained. A package whose manifest cannot be read
//! contributes no dependencies; a package that cannot be fetched at all is
//! kept in the output (the orchestrator retries it during selection) but its
//! subtree is pruned.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::cache::{CacheError, PackageCache};
use crate::framework;
use crate::nuspec::Nuspec;
use crate::package::PackageCoord;
use crate::registry::Registry;

/// Walks the transitive dependency graph of a set of seed packages.
pub struct DependencyWalker<'a> {
    registry: &'a dyn Registry,
    cache: &'a PackageCache,
    target: &'a str,
}

impl<'a> DependencyWalker<'a> {
    #[must_use]
    pub fn new(registry: &'a dyn Registry, cache: &'a PackageCache, target: &'a str) -> Self {
        Self {
            registry,
            cache,
            target,
        }
    }

    /// Compute the transitive closure of `seeds` in breadth-first order.
    pub async fn walk(&self, seeds: Vec<PackageCoord>) -> Vec<PackageCoord> {
        let mut queue: VecDeque<PackageCoord> = seeds.into();
        let mut seen: HashSet<String> = HashSet::new();
        let mut resolved: Vec<PackageCoord> = Vec::new();

        while let Some(coord) = queue.pop_front() {
            if !seen.insert(coord.cache_key()) {
                continue;
            }

            match self.dependencies_of(&coord).await {
                Ok(dependencies) => {
                    for dependency in dependencies {
                        if !seen.contains(&dependency.cache_key()) {
                            queue.push_back(dependency);
                        }
                    }
                }
                Err(e) => {
                    warn!(package = %coord, error = %e, "failed to read dependencies, pruning subtree");
                }
            }
            resolved.push(coord);
        }

        debug!(count = resolved.len(), "dependency walk finished");
        resolved
    }

    /// The direct dependencies of one package, filtered for the target.
    async fn dependencies_of(
        &self,
        coord: &PackageCoord,
    ) -> Result<Vec<PackageCoord>, CacheError> {
        let dir = self
            .cache
            .ensure_cached(&coord.id, &coord.version, self.registry)
            .await?;

        let nuspec = match Nuspec::from_package_dir(&dir) {
            Ok(nuspec) => nuspec,
            Err(e) => {
                warn!(package = %coord, error = %e, "manifest unreadable, assuming no dependencies");
                return Ok(Vec::new());
            }
        };

        let mut dependencies = Vec::new();
        for group in nuspec.dependency_groups() {
            if let Some(ref tfm) = group.target_framework {
                if !framework::is_compatible(Some(tfm), Some(self.target)) {
                    continue;
                }
            }
            for dependency in &group.dependencies {
                let version = match &dependency.version {
                    Some(version) => version.clone(),
                    None => match self.registry.latest_version(&dependency.id).await {
                        Ok(version) => version,
                        Err(e) => {
                            warn!(
                                package = %coord,
                                dependency = %dependency.id,
                                error = %e,
                                "could not bind dependency version, dropping it"
                            );
                            continue;
                        }
                    },
                };
                dependencies.push(PackageCoord::new(&dependency.id, version));
            }
        }
        Ok(dependencies)
    }
}
