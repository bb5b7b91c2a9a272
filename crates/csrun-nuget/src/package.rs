//! Package identity types shared across the resolution pipeline.

use serde::{Deserialize, Serialize};

/// A package reference as written in a script directive.
///
/// The version is optional; references without one are bound to the latest
/// version published on the registry before resolution starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
    /// Package id as written (case preserved).
    pub id: String,
    /// Version as written, if the directive carried one.
    pub version: Option<String>,
}

impl PackageRef {
    /// Create a reference with a pinned version.
    #[must_use]
    pub fn pinned(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: Some(version.into()),
        }
    }

    /// Create a reference without a version.
    #[must_use]
    pub fn latest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }
}

impl std::fmt::Display for PackageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(ref v) = self.version {
            write!(f, "@{v}")?;
        }
        Ok(())
    }
}

/// A fully bound package coordinate: id plus a concrete version.
///
/// Identity is case-insensitive on both components; [`PackageCoord::cache_key`]
/// is the canonical form used for deduplication everywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageCoord {
    pub id: String,
    pub version: String,
}

impl PackageCoord {
    #[must_use]
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    /// Lowercased `id@version`, the dedup key across the system.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{}@{}",
            self.id.to_lowercase(),
            self.version.to_lowercase()
        )
    }
}

impl std::fmt::Display for PackageCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}
