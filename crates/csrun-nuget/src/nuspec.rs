//! `.nuspec` manifest parsing.
//!
//! Every package archive carries a single `<id>.nuspec` XML document at its
//! root describing identity and dependencies. Dependencies come in two
//! shapes:
//!
//! ```text
//! <package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
//!   <metadata>
//!     <dependencies>
//!       <group targetFramework=".NETStandard2.0">
//!         <dependency id="B" version="2.0.0" />
//!       </group>
//!       <!-- or, without groups: -->
//!       <dependency id="C" version="1.0.0" />
//!     </dependencies>
//!   </metadata>
//! </package>
//! ```
//!
//! The root element declares a default namespace inherited by every child,
//! so lookups match on local names. When any `<group>` is present, ungrouped
//! `<dependency>` children are not produced.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors that can occur reading a package manifest.
#[derive(Error, Debug)]
pub enum NuspecError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed manifest XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("no .nuspec manifest found in '{0}'")]
    NotFound(PathBuf),
}

/// A single declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuspecDependency {
    /// Package id the dependency points at.
    pub id: String,
    /// Declared version, if any; absent versions are bound to the registry's
    /// latest during the walk.
    pub version: Option<String>,
}

/// A set of dependencies scoped to a framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGroup {
    /// The group's `targetFramework` attribute; `None` for the implicit
    /// group formed by ungrouped `<dependency>` elements.
    pub target_framework: Option<String>,
    pub dependencies: Vec<NuspecDependency>,
}

/// Parsed view of a package manifest.
#[derive(Debug, Clone, Default)]
pub struct Nuspec {
    groups: Vec<DependencyGroup>,
}

impl Nuspec {
    /// Parse a manifest from XML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not well-formed XML. A well-formed
    /// document without a `<dependencies>` section parses to an empty group
    /// list.
    pub fn parse(xml: &str) -> Result<Self, NuspecError> {
        let mut reader = Reader::from_str(xml);
        // Element path from the root, tracked by local name so the inherited
        // default namespace does not interfere.
        let mut path: Vec<String> = Vec::new();
        let mut groups: Vec<DependencyGroup> = Vec::new();
        let mut ungrouped: Vec<NuspecDependency> = Vec::new();
        let mut current_group: Option<DependencyGroup> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    handle_element(
                        &e,
                        false,
                        &path,
                        &mut groups,
                        &mut ungrouped,
                        &mut current_group,
                    );
                    path.push(local_name(&e));
                }
                Event::Empty(e) => {
                    handle_element(
                        &e,
                        true,
                        &path,
                        &mut groups,
                        &mut ungrouped,
                        &mut current_group,
                    );
                }
                Event::End(_) => {
                    if let Some(name) = path.pop() {
                        if name == "group" && in_dependencies(&path) {
                            if let Some(group) = current_group.take() {
                                groups.push(group);
                            }
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        // Any <group> presence means ungrouped dependencies are ignored.
        if groups.is_empty() && !ungrouped.is_empty() {
            groups.push(DependencyGroup {
                target_framework: None,
                dependencies: ungrouped,
            });
        }

        Ok(Self { groups })
    }

    /// Locate and parse the manifest of an extracted package directory.
    ///
    /// # Errors
    ///
    /// Returns [`NuspecError::NotFound`] when no root-level `*.nuspec` file
    /// exists, or a parse error for a malformed manifest.
    pub fn from_package_dir(dir: &Path) -> Result<Self, NuspecError> {
        let manifest =
            find_nuspec(dir).ok_or_else(|| NuspecError::NotFound(dir.to_path_buf()))?;
        let xml = fs::read_to_string(manifest)?;
        Self::parse(&xml)
    }

    /// The manifest's dependency groups.
    #[must_use]
    pub fn dependency_groups(&self) -> &[DependencyGroup] {
        &self.groups
    }
}

/// Find the first root-level `*.nuspec` file in a package directory.
#[must_use]
pub fn find_nuspec(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.to_lowercase().ends_with(".nuspec"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn in_dependencies(path: &[String]) -> bool {
    path.len() == 3 && path[0] == "package" && path[1] == "metadata" && path[2] == "dependencies"
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

fn handle_element(
    e: &BytesStart<'_>,
    self_closing: bool,
    path: &[String],
    groups: &mut Vec<DependencyGroup>,
    ungrouped: &mut Vec<NuspecDependency>,
    current_group: &mut Option<DependencyGroup>,
) {
    let name = local_name(e);
    match name.as_str() {
        "group" if in_dependencies(path) => {
            // A self-closing <group/> still counts as a group; it suppresses
            // any ungrouped dependencies and may legitimately carry none.
            let group = DependencyGroup {
                target_framework: attribute(e, "targetFramework"),
                dependencies: Vec::new(),
            };
            if self_closing {
                groups.push(group);
            } else {
                *current_group = Some(group);
            }
        }
        "dependency" => {
            // Dependencies without an id are dropped silently.
            let Some(id) = attribute(e, "id") else {
                return;
            };
            let dependency = NuspecDependency {
                id,
                version: attribute(e, "version"),
            };
            if let Some(group) = current_group.as_mut() {
                group.dependencies.push(dependency);
            } else if in_dependencies(path) {
                ungrouped.push(dependency);
            }
        }
        _ => {}
    }
}
