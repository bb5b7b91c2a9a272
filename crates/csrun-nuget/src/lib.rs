//! NuGet package resolution for single-file C# script execution.
//!
//! This crate turns the `// #nuget:` directives of a script into the flat
//! list of assembly paths its compilation needs:
//!
//! - comment directive scanning ([`parse_directives`])
//! - registry version lookup and archive download ([`NugetClient`])
//! - package manifest parsing ([`Nuspec`])
//! - target framework compatibility and priority ([`is_compatible`])
//! - breadth-first transitive dependency walking ([`DependencyWalker`])
//! - an on-disk extraction cache with integrity checks ([`PackageCache`])
//! - best-match binary selection per target ([`select_artifacts`])
//! - the orchestrator tying it all together ([`ScriptPackageResolver`])
//!
//! ```no_run
//! use std::sync::Arc;
//! use csrun_nuget::{parse_directives, NugetClient, ScriptPackageResolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = "// #nuget: Newtonsoft.Json@13.0.3\nSystem.Console.WriteLine(1);";
//! let refs = parse_directives(source);
//! let registry = Arc::new(NugetClient::new()?);
//! let resolver = ScriptPackageResolver::new(registry, "/tmp/csrun-cache")?;
//! let assemblies = resolver.resolve(&refs).await?;
//! # Ok(())
//! # }
//! ```

mod artifacts;
mod cache;
mod directive;
mod framework;
mod nuspec;
mod package;
mod registry;
mod resolver;
mod walker;

pub use artifacts::select_artifacts;
pub use cache::{CacheError, PackageCache, HASH_SENTINEL};
pub use directive::parse_directives;
pub use framework::{
    family, is_compatible, normalize, priority, selection_priority, Family, DEFAULT_TARGET,
    EXACT_MATCH_BONUS, REF_ASSEMBLY_BONUS,
};
pub use nuspec::{DependencyGroup, Nuspec, NuspecDependency, NuspecError};
pub use package::{PackageCoord, PackageRef};
pub use registry::{NugetClient, Registry, RegistryError, FLAT_CONTAINER_URL, SEARCH_URL};
pub use resolver::{ResolveError, ScriptPackageResolver};
pub use walker::DependencyWalker;
