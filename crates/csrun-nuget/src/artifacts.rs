//! Binary artifact selection from an extracted package.
//!
//! Packages ship binaries under `lib/<tfm>/` (implementation assemblies) and
//! `ref/<tfm>/` (reference assemblies). Selection walks both roots, keeps
//! the framework directories compatible with the target, and for every
//! distinct assembly name returns the single highest-priority candidate.
//! Reference assemblies outrank implementation assemblies at the same
//! framework. Packages that predate the framework-directory convention keep
//! loose binaries directly under `lib/`; those are picked up as a last
//! resort regardless of the target.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::framework;

const LIB_ROOT: &str = "lib";
const REF_ROOT: &str = "ref";

/// Select the binaries of an extracted package for a target framework.
///
/// Returns at most one path per assembly name (case-insensitive, extension
/// stripped). Resource satellite assemblies (`*.resources.dll`) are never
/// selected. IO problems while scanning are logged and treated as absent
/// directories.
#[must_use]
pub fn select_artifacts(package_dir: &Path, target: &str) -> Vec<PathBuf> {
    let mut candidates: Vec<(PathBuf, i32)> = Vec::new();

    for (root, bonus) in [(LIB_ROOT, 0), (REF_ROOT, framework::REF_ASSEMBLY_BONUS)] {
        let root_dir = package_dir.join(root);
        if !root_dir.is_dir() {
            continue;
        }
        for child in sorted_children(&root_dir) {
            if !child.is_dir() {
                continue;
            }
            let Some(tfm) = child.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if framework::is_compatible(Some(tfm), Some(target)) {
                let priority = framework::selection_priority(tfm, target) + bonus;
                collect_assemblies(&child, priority, &mut candidates);
            }
        }
    }

    if candidates.is_empty() {
        // Last resort: loose binaries at the top of lib/, target ignored.
        let lib_dir = package_dir.join(LIB_ROOT);
        if lib_dir.is_dir() {
            for path in sorted_children(&lib_dir) {
                if path.is_file() && is_selectable_assembly(&path) {
                    candidates.push((path, 0));
                }
            }
            if !candidates.is_empty() {
                debug!(
                    package_dir = %package_dir.display(),
                    "no framework directory matched, falling back to loose lib binaries"
                );
            }
        }
    }

    dedup_by_assembly_name(candidates)
}

/// Recursively gather selectable assemblies under `dir` at a fixed priority.
fn collect_assemblies(dir: &Path, priority: i32, out: &mut Vec<(PathBuf, i32)>) {
    for path in sorted_children(dir) {
        if path.is_dir() {
            collect_assemblies(&path, priority, out);
        } else if is_selectable_assembly(&path) {
            out.push((path, priority));
        }
    }
}

fn is_selectable_assembly(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    name.ends_with(".dll") && !name.ends_with(".resources.dll")
}

/// Directory children in name order, for deterministic selection.
fn sorted_children(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => {
            let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            paths.sort();
            paths
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to scan package directory");
            Vec::new()
        }
    }
}

/// Keep the highest-priority candidate per assembly name; earlier candidates
/// win ties and define output order.
fn dedup_by_assembly_name(candidates: Vec<(PathBuf, i32)>) -> Vec<PathBuf> {
    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, (PathBuf, i32)> = HashMap::new();

    for (path, priority) in candidates {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let key = stem.to_lowercase();
        match best.get_mut(&key) {
            Some(existing) => {
                if priority > existing.1 {
                    *existing = (path, priority);
                }
            }
            None => {
                best.insert(key.clone(), (path, priority));
                order.push(key);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| best.remove(&key).map(|(path, _)| path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"bin").unwrap();
    }

    #[test]
    fn test_selects_compatible_framework_directory() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/netstandard2.0/A.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("lib/netstandard2.0/A.dll")]);
    }

    #[test]
    fn test_incompatible_directories_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/net9.0/A.dll"));

        assert!(select_artifacts(tmp.path(), "net8.0").is_empty());
    }

    #[test]
    fn test_best_framework_wins_per_assembly() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/netstandard2.0/X.dll"));
        touch(&tmp.path().join("lib/netcoreapp3.1/X.dll"));

        let selected = select_artifacts(tmp.path(), "netcoreapp3.1");
        assert_eq!(selected, vec![tmp.path().join("lib/netcoreapp3.1/X.dll")]);
    }

    #[test]
    fn test_ref_outranks_lib_for_same_assembly() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/net8.0/A.dll"));
        touch(&tmp.path().join("ref/net8.0/A.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("ref/net8.0/A.dll")]);
    }

    #[test]
    fn test_ref_only_package_still_selects() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("ref/netstandard2.0/Api.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("ref/netstandard2.0/Api.dll")]);
    }

    #[test]
    fn test_resource_assemblies_are_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/net8.0/A.dll"));
        touch(&tmp.path().join("lib/net8.0/de/A.resources.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("lib/net8.0/A.dll")]);
    }

    #[test]
    fn test_nested_directories_are_collected() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/net8.0/runtimes/linux/B.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(
            selected,
            vec![tmp.path().join("lib/net8.0/runtimes/linux/B.dll")]
        );
    }

    #[test]
    fn test_loose_lib_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/Legacy.dll"));
        touch(&tmp.path().join("lib/Legacy.resources.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("lib/Legacy.dll")]);
    }

    #[test]
    fn test_fallback_not_used_when_a_directory_matches() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/Loose.dll"));
        touch(&tmp.path().join("lib/net8.0/Real.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected, vec![tmp.path().join("lib/net8.0/Real.dll")]);
    }

    #[test]
    fn test_empty_package_selects_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(select_artifacts(tmp.path(), "net8.0").is_empty());
    }

    #[test]
    fn test_no_duplicate_assembly_names() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("lib/netstandard2.0/X.dll"));
        touch(&tmp.path().join("lib/netcoreapp3.1/X.dll"));
        touch(&tmp.path().join("ref/netstandard2.0/X.dll"));

        let selected = select_artifacts(tmp.path(), "net8.0");
        assert_eq!(selected.len(), 1);
    }
}
