//! Inline package directive scanning.
//!
//! Scripts declare their NuGet dependencies in comment directives:
//!
//! ```text
//! // #nuget: Newtonsoft.Json@13.0.3
//! // #package: Serilog
//! ```
//!
//! The keyword is case-insensitive and surrounding whitespace is ignored.
//! The scanner does not validate id or version syntax; malformed names fail
//! later, at registry lookup time.

use std::sync::OnceLock;

use regex::Regex;

use crate::package::PackageRef;

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)//\s*#(?:nuget|package):\s*([^\s@]+)(?:@(\S+))?")
            .expect("directive regex is valid")
    })
}

/// Extract package references from script source text.
///
/// Returns distinct `(id, version)` pairs in first-seen order. Empty input
/// yields an empty list.
#[must_use]
pub fn parse_directives(source: &str) -> Vec<PackageRef> {
    let mut refs = Vec::new();
    for caps in directive_regex().captures_iter(source) {
        let package = PackageRef {
            id: caps[1].to_string(),
            version: caps.get(2).map(|m| m.as_str().to_string()),
        };
        if !refs.contains(&package) {
            refs.push(package);
        }
    }
    refs
}
