//! Target framework moniker (TFM) normalization, compatibility, and priority.
//!
//! This module decides two things for the rest of the pipeline:
//! - whether binaries built for one framework can be loaded by a target
//!   runtime ([`is_compatible`]),
//! - which of several compatible candidates is the best match
//!   ([`selection_priority`]).
//!
//! Monikers fall into three families: `netstandard*` (the portable API
//! surface), `netcoreapp*` / `netN.M` (the modern runtime), and dotless
//! `netNN`/`netNNN` (the legacy framework). Priorities are a single total
//! order: the newest modern runtime scores highest, the oldest netstandard
//! lowest.

/// Default target when the caller does not specify one.
pub const DEFAULT_TARGET: &str = "net8.0";

/// Bonus applied when a package framework matches the target string exactly.
pub const EXACT_MATCH_BONUS: i32 = 10_000;

/// Bonus applied to binaries found under a `ref/` root.
pub const REF_ASSEMBLY_BONUS: i32 = 1_000;

/// Framework family of a normalized moniker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// `netstandard*`.
    Standard,
    /// `netcoreapp*`, `netN.M` (N >= 5).
    Core,
    /// Legacy dotless monikers (`net48`, `net472`, ...).
    Framework,
}

/// Priority table over recognized monikers, oldest-and-most-portable first.
///
/// The table intentionally carries the full `netcoreapp` line so the
/// netstandard crossover thresholds below resolve to real values.
const PRIORITIES: &[(&str, i32)] = &[
    ("netstandard1.0", 1),
    ("netstandard1.1", 2),
    ("netstandard1.2", 3),
    ("netstandard1.3", 4),
    ("netstandard1.4", 5),
    ("netstandard1.5", 6),
    ("netstandard1.6", 7),
    ("netstandard2.0", 8),
    ("netstandard2.1", 9),
    ("net11", 10),
    ("net20", 11),
    ("net35", 12),
    ("net40", 13),
    ("net45", 14),
    ("net451", 15),
    ("net452", 16),
    ("net46", 17),
    ("net461", 18),
    ("net462", 19),
    ("net47", 20),
    ("net471", 21),
    ("net472", 22),
    ("net48", 23),
    ("net481", 24),
    ("netcoreapp1.0", 25),
    ("netcoreapp1.1", 26),
    ("netcoreapp2.0", 27),
    ("netcoreapp2.1", 28),
    ("netcoreapp2.2", 29),
    ("netcoreapp3.0", 30),
    ("netcoreapp3.1", 31),
    ("net5.0", 32),
    ("net6.0", 33),
    ("net7.0", 34),
    ("net8.0", 35),
    ("net9.0", 36),
    ("net10.0", 37),
];

/// Look up the priority of a normalized moniker.
#[must_use]
pub fn priority(tfm: &str) -> Option<i32> {
    PRIORITIES
        .iter()
        .find(|(name, _)| *name == tfm)
        .map(|(_, p)| *p)
}

/// Normalize a framework moniker for comparison.
///
/// - trims and lowercases,
/// - rewrites the long forms found in `.nuspec` `targetFramework` attributes
///   (`.NETStandard2.0`, `.NETCoreApp3.1`, `.NETFramework4.7.2`) to their
///   short equivalents,
/// - collapses the dotless modern form (`net80`) to `net8.0`.
///
/// Unrecognized strings pass through lowercased; normalization is idempotent.
#[must_use]
pub fn normalize(tfm: &str) -> String {
    let tfm = tfm.trim().to_lowercase();

    if let Some(version) = tfm.strip_prefix(".netstandard") {
        return format!("netstandard{version}");
    }
    if let Some(version) = tfm.strip_prefix(".netcoreapp") {
        return format!("netcoreapp{version}");
    }
    if let Some(version) = tfm.strip_prefix(".netframework") {
        // ".NETFramework4.7.2" -> "net472"
        let digits: String = version.chars().filter(|c| *c != '.').collect();
        return format!("net{digits}");
    }

    // "net80" -> "net8.0"; only the modern runtime (major >= 5) is written
    // this way, legacy monikers like "net48" stay as-is.
    if tfm.len() == 5 && !tfm.contains('.') {
        if let Some(digits) = tfm.strip_prefix("net") {
            let mut chars = digits.chars();
            if let (Some(major), Some(minor)) = (chars.next(), chars.next()) {
                if major.is_ascii_digit() && minor.is_ascii_digit() && major >= '5' {
                    return format!("net{major}.{minor}");
                }
            }
        }
    }

    tfm
}

/// Derive the family of a normalized moniker.
#[must_use]
pub fn family(tfm: &str) -> Option<Family> {
    if tfm.starts_with("netstandard") {
        return Some(Family::Standard);
    }
    if tfm.starts_with("netcoreapp") {
        return Some(Family::Core);
    }
    if tfm.starts_with("net") {
        if tfm.contains('.') || tfm.len() > 5 {
            return Some(Family::Core);
        }
        return Some(Family::Framework);
    }
    None
}

/// Decide whether binaries declared for `package_tfm` can be used by a
/// `target_tfm` runtime.
///
/// Rules, in order:
/// 1. either operand absent or empty: not compatible;
/// 2. equal after normalization: compatible;
/// 3. either priority unknown: not compatible;
/// 4. a `netstandard2.0`/`netstandard2.1` package crosses over to modern and
///    framework targets above the respective support thresholds;
/// 5. otherwise compatible iff the package does not outrank the target and
///    both share a family.
#[must_use]
pub fn is_compatible(package_tfm: Option<&str>, target_tfm: Option<&str>) -> bool {
    let (Some(package), Some(target)) = (package_tfm, target_tfm) else {
        return false;
    };
    if package.trim().is_empty() || target.trim().is_empty() {
        return false;
    }

    let package = normalize(package);
    let target = normalize(target);
    if package == target {
        return true;
    }

    let (Some(pp), Some(tp)) = (priority(&package), priority(&target)) else {
        return false;
    };
    let (Some(pf), Some(tf)) = (family(&package), family(&target)) else {
        return false;
    };

    if pf == Family::Standard && tf != Family::Standard {
        return match package.as_str() {
            "netstandard2.0" => {
                priority("netcoreapp2.0").is_some_and(|th| tp >= th)
                    || priority("net461").is_some_and(|th| tp >= th)
            }
            "netstandard2.1" => priority("netcoreapp3.0").is_some_and(|th| tp >= th),
            _ => false,
        };
    }

    pp <= tp && pf == tf
}

/// Score a package framework against the target for artifact selection.
///
/// The base score is the normalized priority (0 for unrecognized monikers
/// that only matched by string equality); an exact raw-string match with the
/// target earns [`EXACT_MATCH_BONUS`]. The `ref/` bonus is applied by the
/// artifact selector, which knows the provenance.
#[must_use]
pub fn selection_priority(package_tfm: &str, target_tfm: &str) -> i32 {
    let base = priority(&normalize(package_tfm)).unwrap_or(0);
    if package_tfm == target_tfm {
        base + EXACT_MATCH_BONUS
    } else {
        base
    }
}
