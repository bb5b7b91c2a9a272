//! csrun - run single-file C# scripts with inline NuGet package references.
//!
//! Scripts declare their dependencies in comments:
//!
//! ```csharp
//! // #nuget: Newtonsoft.Json@13.0.3
//! // #ref: ../shared/Helpers.dll
//! using Newtonsoft.Json;
//! System.Console.WriteLine(JsonConvert.SerializeObject(new { ok = true }));
//! ```
//!
//! `csrun run script.csx` resolves the packages (transitively, with a local
//! cache), compiles the script against the selected assemblies, and executes
//! it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use csrun_nuget::{parse_directives, NugetClient, ScriptPackageResolver, DEFAULT_TARGET};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod driver;

use driver::{CompilerDriver, DotnetDriver};

#[derive(Parser)]
#[command(name = "csrun")]
#[command(version)]
#[command(about = "Run single-file C# scripts with inline NuGet references", long_about = None)]
struct Cli {
    /// Enable debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a script
    Run {
        /// Path to the script file
        script: PathBuf,

        /// Package cache directory (defaults to the platform cache dir)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Target framework moniker
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: String,

        /// Maximum concurrent package downloads (defaults to CPU count)
        #[arg(long)]
        jobs: Option<usize>,

        /// C# compiler executable
        #[arg(long, default_value = "csc")]
        compiler: String,

        /// Runtime host executable
        #[arg(long, default_value = "dotnet")]
        runtime: String,

        /// Arguments passed through to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Resolve a script's package references and print the assembly paths
    Resolve {
        /// Path to the script file
        script: PathBuf,

        /// Package cache directory (defaults to the platform cache dir)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Target framework moniker
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: String,

        /// Maximum concurrent package downloads (defaults to CPU count)
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Manage the package cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the package cache directory
    Dir {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Delete all cached packages
    Clear {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            script,
            cache_dir,
            target,
            jobs,
            compiler,
            runtime,
            args,
        } => {
            let source = read_script(&script)?;
            let assemblies =
                block_on(resolve_assemblies(&source, cache_dir, &target, jobs))?;

            let script_dir = script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            let mut references = assemblies;
            references.extend(driver::local_references(&source, &script_dir)?);

            let driver = DotnetDriver::new(compiler, runtime, target);
            let code = driver.compile_and_run(&script, &source, &references, &args)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }

        Commands::Resolve {
            script,
            cache_dir,
            target,
            jobs,
        } => {
            let source = read_script(&script)?;
            let assemblies =
                block_on(resolve_assemblies(&source, cache_dir, &target, jobs))?;
            for path in assemblies {
                println!("{}", path.display());
            }
            Ok(())
        }

        Commands::Cache { action } => match action {
            CacheAction::Dir { cache_dir } => {
                println!("{}", cache_dir.unwrap_or_else(default_cache_dir).display());
                Ok(())
            }
            CacheAction::Clear { cache_dir } => {
                let dir = cache_dir.unwrap_or_else(default_cache_dir);
                if dir.exists() {
                    std::fs::remove_dir_all(&dir).with_context(|| {
                        format!("failed to clear package cache at '{}'", dir.display())
                    })?;
                }
                println!("Cleared {}", dir.display());
                Ok(())
            }
        },

        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "csrun", &mut io::stdout());
            Ok(())
        }
    }
}

/// Resolve a script's package directives to assembly paths.
async fn resolve_assemblies(
    source: &str,
    cache_dir: Option<PathBuf>,
    target: &str,
    jobs: Option<usize>,
) -> Result<Vec<PathBuf>> {
    let refs = parse_directives(source);
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    let registry = Arc::new(NugetClient::new().context("failed to create registry client")?);
    let cache_root = cache_dir.unwrap_or_else(default_cache_dir);
    let mut resolver = ScriptPackageResolver::new(registry, &cache_root)
        .with_context(|| format!("failed to open package cache at '{}'", cache_root.display()))?
        .with_target(target);
    if let Some(jobs) = jobs {
        resolver = resolver.with_max_downloads(jobs);
    }

    resolver
        .resolve(&refs)
        .await
        .context("package resolution failed")
}

fn read_script(script: &Path) -> Result<String> {
    std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script '{}'", script.display()))
}

fn block_on<T>(future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?
        .block_on(future)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "csrun=debug,csrun_nuget=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Platform cache directory for downloaded packages.
fn default_cache_dir() -> PathBuf {
    if let Ok(cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(cache).join("csrun").join("packages");
    }
    if let Some(home) = std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
    {
        #[cfg(target_os = "macos")]
        let base = PathBuf::from(&home).join("Library").join("Caches");
        #[cfg(target_os = "windows")]
        let base = std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&home));
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let base = PathBuf::from(&home).join(".cache");
        return base.join("csrun").join("packages");
    }
    PathBuf::from(".csrun-cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_command() {
        let cli = Cli::try_parse_from(["csrun", "run", "script.csx", "--target", "net6.0"])
            .unwrap();
        match cli.command {
            Commands::Run { script, target, .. } => {
                assert_eq!(script, PathBuf::from("script.csx"));
                assert_eq!(target, "net6.0");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_passes_script_arguments_through() {
        let cli =
            Cli::try_parse_from(["csrun", "run", "s.csx", "--", "--flag", "value"]).unwrap();
        match cli.command {
            Commands::Run { args, .. } => assert_eq!(args, vec!["--flag", "value"]),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_default_cache_dir_is_not_empty() {
        assert!(!default_cache_dir().as_os_str().is_empty());
    }
}
