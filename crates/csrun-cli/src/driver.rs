//! External compiler and runtime invocation.
//!
//! The resolver's job ends at a list of assembly paths; turning those plus
//! the script source into a running process is delegated to the system
//! toolchain. [`DotnetDriver`] compiles with `csc` and executes the produced
//! assembly with `dotnet`, both overridable from the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::debug;

/// Toolchain abstraction consuming the resolver's output.
pub trait CompilerDriver {
    /// Compile `source` against `references` and run it with `args`,
    /// returning the script's exit code.
    fn compile_and_run(
        &self,
        script: &Path,
        source: &str,
        references: &[PathBuf],
        args: &[String],
    ) -> Result<i32>;
}

/// Driver shelling out to the .NET toolchain.
pub struct DotnetDriver {
    compiler: String,
    runtime: String,
    target: String,
}

impl DotnetDriver {
    #[must_use]
    pub fn new(
        compiler: impl Into<String>,
        runtime: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            compiler: compiler.into(),
            runtime: runtime.into(),
            target: target.into(),
        }
    }

    /// Minimal runtimeconfig.json so the host can pick a framework.
    fn runtime_config(&self) -> String {
        let version = self
            .target
            .strip_prefix("net")
            .filter(|v| v.contains('.'))
            .unwrap_or("8.0");
        format!(
            "{{\n  \"runtimeOptions\": {{\n    \"tfm\": \"{}\",\n    \"framework\": {{\n      \"name\": \"Microsoft.NETCore.App\",\n      \"version\": \"{}.0\"\n    }}\n  }}\n}}\n",
            self.target, version
        )
    }
}

impl CompilerDriver for DotnetDriver {
    fn compile_and_run(
        &self,
        script: &Path,
        source: &str,
        references: &[PathBuf],
        args: &[String],
    ) -> Result<i32> {
        let workdir = tempfile::tempdir().context("failed to create build directory")?;
        let source_path = workdir.path().join("script.cs");
        let output_path = workdir.path().join("script.dll");
        fs::write(&source_path, source)
            .with_context(|| format!("failed to stage '{}'", script.display()))?;

        let mut compile = Command::new(&self.compiler);
        compile
            .arg("-nologo")
            .arg("-target:exe")
            .arg(format!("-out:{}", output_path.display()));
        for reference in references {
            compile.arg(format!("-r:{}", reference.display()));
        }
        compile.arg(&source_path);
        debug!(compiler = %self.compiler, references = references.len(), "compiling script");

        let status = compile
            .status()
            .with_context(|| format!("failed to launch compiler '{}'", self.compiler))?;
        if !status.success() {
            bail!("compilation of '{}' failed", script.display());
        }

        fs::write(
            workdir.path().join("script.runtimeconfig.json"),
            self.runtime_config(),
        )
        .context("failed to write runtime configuration")?;

        let status = Command::new(&self.runtime)
            .arg(&output_path)
            .args(args)
            .status()
            .with_context(|| format!("failed to launch runtime '{}'", self.runtime))?;
        Ok(status.code().unwrap_or(1))
    }
}

fn ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)//\s*#ref:\s*(\S+)").expect("ref regex is valid"))
}

/// Resolve `// #ref: <path>` directives against the script's directory.
///
/// # Errors
///
/// Returns an error when a referenced file does not exist.
pub fn local_references(source: &str, script_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut references = Vec::new();
    for caps in ref_regex().captures_iter(source) {
        let raw = &caps[1];
        let path = script_dir.join(raw);
        if !path.is_file() {
            bail!("referenced assembly '{raw}' not found at '{}'", path.display());
        }
        if !references.contains(&path) {
            references.push(path);
        }
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_tracks_target() {
        let driver = DotnetDriver::new("csc", "dotnet", "net8.0");
        let config = driver.runtime_config();
        assert!(config.contains("\"tfm\": \"net8.0\""));
        assert!(config.contains("\"version\": \"8.0.0\""));
    }

    #[test]
    fn test_runtime_config_falls_back_for_odd_targets() {
        let driver = DotnetDriver::new("csc", "dotnet", "net48");
        assert!(driver.runtime_config().contains("\"version\": \"8.0.0\""));
    }

    #[test]
    fn test_local_references_resolve_relative_to_script() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("helper.dll"), b"bin").unwrap();

        let refs = local_references("// #ref: helper.dll\n", tmp.path()).unwrap();
        assert_eq!(refs, vec![tmp.path().join("helper.dll")]);
    }

    #[test]
    fn test_missing_local_reference_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(local_references("// #ref: nope.dll\n", tmp.path()).is_err());
    }

    #[test]
    fn test_duplicate_local_references_collapse() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.dll"), b"bin").unwrap();

        let refs =
            local_references("// #ref: a.dll\n// #ref: a.dll\n", tmp.path()).unwrap();
        assert_eq!(refs.len(), 1);
    }
}
