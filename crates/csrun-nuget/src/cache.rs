//! On-disk package cache.
//!
//! Each package version extracts into `<root>/<id>/<version>/` (both
//! components lowercased). An entry is valid when it holds the hash sentinel
//! written at download time *and* a root-level `*.nuspec` manifest; anything
//! else is treated as a partial extraction and rebuilt from scratch. The
//! layout inside a valid entry mirrors the archive verbatim, plus the
//! sentinel:
//!
//! ```text
//! <root>/newtonsoft.json/13.0.3/
//!     .package.hash
//!     newtonsoft.json.nuspec
//!     lib/netstandard2.0/Newtonsoft.Json.dll
//! ```

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::nuspec;
use crate::registry::{Registry, RegistryError};

/// Name of the sentinel file holding the base64 SHA-256 of the archive.
///
/// The hash is written for forward compatibility and is not read back;
/// validity is existence-only.
pub const HASH_SENTINEL: &str = ".package.hash";

/// Errors that can occur populating the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to download {id}@{version}: {source}")]
    Download {
        id: String,
        version: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to extract archive: {0}")]
    Extract(#[from] zip::result::ZipError),

    #[error("cache entry for {id}@{version} failed validation after extraction")]
    Integrity { id: String, version: String },
}

/// The package cache rooted at a directory on local disk.
///
/// Concurrent callers asking for the same entry are serialized on a
/// per-entry lock: the second caller waits for the first and then reuses the
/// populated directory instead of downloading again.
#[derive(Debug)]
pub struct PackageCache {
    root: PathBuf,
    entry_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PackageCache {
    /// Open (and create if absent) a cache at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entry_locks: DashMap::new(),
        })
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entry directory for a package version.
    #[must_use]
    pub fn entry_dir(&self, id: &str, version: &str) -> PathBuf {
        self.root
            .join(id.to_lowercase())
            .join(version.to_lowercase())
    }

    /// Check the cache-entry invariants: hash sentinel plus a root manifest.
    #[must_use]
    pub fn entry_is_valid(dir: &Path) -> bool {
        dir.join(HASH_SENTINEL).is_file() && nuspec::find_nuspec(dir).is_some()
    }

    /// Ensure a package version is present and extracted, downloading it if
    /// needed. Returns the entry directory.
    ///
    /// A valid existing entry is returned without network I/O. Otherwise the
    /// entry is rebuilt: deleted, re-created, populated from a fresh
    /// download, and validated; on any failure the directory is removed
    /// again (best-effort) before the error propagates.
    ///
    /// # Errors
    ///
    /// Returns an error when the download, extraction, or post-extraction
    /// validation fails, or on filesystem errors handling the entry.
    pub async fn ensure_cached(
        &self,
        id: &str,
        version: &str,
        registry: &dyn Registry,
    ) -> Result<PathBuf, CacheError> {
        let dir = self.entry_dir(id, version);
        let lock = self.entry_lock(id, version);
        let _guard = lock.lock().await;

        if dir.exists() {
            if Self::entry_is_valid(&dir) {
                debug!(package = %id, %version, "cache hit");
                return Ok(dir);
            }
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let populated = self.populate(&dir, id, version, registry).await;
        if let Err(e) = populated {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        if !Self::entry_is_valid(&dir) {
            let _ = fs::remove_dir_all(&dir);
            return Err(CacheError::Integrity {
                id: id.to_string(),
                version: version.to_string(),
            });
        }
        Ok(dir)
    }

    fn entry_lock(&self, id: &str, version: &str) -> Arc<Mutex<()>> {
        let key = format!("{}@{}", id.to_lowercase(), version.to_lowercase());
        self.entry_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn populate(
        &self,
        dir: &Path,
        id: &str,
        version: &str,
        registry: &dyn Registry,
    ) -> Result<(), CacheError> {
        let bytes = registry
            .download_archive(id, version)
            .await
            .map_err(|source| CacheError::Download {
                id: id.to_string(),
                version: version.to_string(),
                source,
            })?;

        let digest = BASE64.encode(Sha256::digest(&bytes));
        tokio::fs::write(dir.join(HASH_SENTINEL), digest).await?;

        let dest = dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_archive(&bytes, &dest))
            .await
            .map_err(|e| CacheError::Io(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

/// Extract a ZIP archive into `dest`, skipping entries that would escape it.
fn extract_archive(bytes: &[u8], dest: &Path) -> Result<(), CacheError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping archive entry escaping the cache directory");
            continue;
        };
        let path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&path)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::package::PackageCoord;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// In-memory registry serving prebuilt archives.
    pub(crate) struct FixtureRegistry {
        pub archives: HashMap<String, Vec<u8>>,
        pub latest: HashMap<String, String>,
        pub downloads: AtomicUsize,
        pub version_lookups: AtomicUsize,
    }

    impl FixtureRegistry {
        pub fn new() -> Self {
            Self {
                archives: HashMap::new(),
                latest: HashMap::new(),
                downloads: AtomicUsize::new(0),
                version_lookups: AtomicUsize::new(0),
            }
        }

        pub fn insert(&mut self, id: &str, version: &str, archive: Vec<u8>) {
            let coord = PackageCoord::new(id, version);
            self.archives.insert(coord.cache_key(), archive);
            self.latest.insert(id.to_lowercase(), version.to_string());
        }

        /// Insert an archive without registering a latest version.
        pub fn insert_raw(&mut self, id: &str, version: &str, archive: Vec<u8>) {
            self.archives
                .insert(PackageCoord::new(id, version).cache_key(), archive);
        }
    }

    #[async_trait]
    impl Registry for FixtureRegistry {
        async fn latest_version(&self, id: &str) -> Result<String, RegistryError> {
            self.version_lookups.fetch_add(1, Ordering::SeqCst);
            self.latest
                .get(&id.to_lowercase())
                .cloned()
                .ok_or_else(|| RegistryError::VersionResolution { id: id.to_string() })
        }

        async fn download_archive(
            &self,
            id: &str,
            version: &str,
        ) -> Result<Vec<u8>, RegistryError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.archives
                .get(&PackageCoord::new(id, version).cache_key())
                .cloned()
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
        }
    }

    /// Build a `.nupkg`-shaped archive: a root nuspec plus the given files.
    pub(crate) fn build_archive(id: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
        build_archive_with_deps(id, "", files)
    }

    /// Like [`build_archive`], with raw dependency XML inside
    /// `<dependencies>`.
    pub(crate) fn build_archive_with_deps(
        id: &str,
        dependencies: &str,
        files: &[(&str, &[u8])],
    ) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let dependencies = if dependencies.is_empty() {
            String::new()
        } else {
            format!("<dependencies>{dependencies}</dependencies>")
        };
        writer
            .start_file(format!("{}.nuspec", id.to_lowercase()), options)
            .unwrap();
        writer
            .write_all(
                format!(
                    "<package xmlns=\"urn:test\"><metadata><id>{id}</id>\
                     {dependencies}</metadata></package>"
                )
                .as_bytes(),
            )
            .unwrap();
        for (name, contents) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn cache_in(dir: &Path) -> PackageCache {
        PackageCache::new(dir.join("packages")).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_cached_extracts_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();
        registry.insert(
            "Json.Lib",
            "1.0.0",
            build_archive("Json.Lib", &[("lib/netstandard2.0/Json.Lib.dll", b"bin")]),
        );

        let dir = cache.ensure_cached("Json.Lib", "1.0.0", &registry).await.unwrap();
        assert_eq!(dir, cache.entry_dir("Json.Lib", "1.0.0"));
        assert!(dir.join(HASH_SENTINEL).is_file());
        assert!(dir.join("json.lib.nuspec").is_file());
        assert!(dir.join("lib/netstandard2.0/Json.Lib.dll").is_file());
    }

    #[tokio::test]
    async fn test_second_call_hits_cache_without_download() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();
        registry.insert("A", "1.0.0", build_archive("A", &[]));

        cache.ensure_cached("A", "1.0.0", &registry).await.unwrap();
        cache.ensure_cached("A", "1.0.0", &registry).await.unwrap();
        assert_eq!(registry.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_entry_is_rebuilt() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();
        registry.insert("A", "1.0.0", build_archive("A", &[]));

        // A stale, sentinel-less directory left behind by a crash.
        let dir = cache.entry_dir("A", "1.0.0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("leftover.txt"), b"junk").unwrap();

        let dir = cache.ensure_cached("A", "1.0.0", &registry).await.unwrap();
        assert_eq!(registry.downloads.load(Ordering::SeqCst), 1);
        assert!(!dir.join("leftover.txt").exists());
        assert!(dir.join(HASH_SENTINEL).is_file());
    }

    #[tokio::test]
    async fn test_failed_download_rolls_back_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let registry = FixtureRegistry::new();

        let result = cache.ensure_cached("Missing", "1.0.0", &registry).await;
        assert!(matches!(result, Err(CacheError::Download { .. })));
        assert!(!cache.entry_dir("Missing", "1.0.0").exists());
    }

    #[tokio::test]
    async fn test_archive_without_manifest_fails_integrity() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();
        // Hand-built archive with no nuspec at all.
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("lib/net8.0/A.dll", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"bin").unwrap();
        let archive = writer.finish().unwrap().into_inner();
        registry.insert_raw("A", "1.0.0", archive);

        let result = cache.ensure_cached("A", "1.0.0", &registry).await;
        assert!(matches!(result, Err(CacheError::Integrity { .. })));
        assert!(!cache.entry_dir("A", "1.0.0").exists());
    }

    #[tokio::test]
    async fn test_path_traversal_entry_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();
        registry.insert(
            "Evil",
            "1.0.0",
            build_archive(
                "Evil",
                &[
                    ("../../escape.dll", b"evil"),
                    ("lib/net8.0/Good.dll", b"good"),
                ],
            ),
        );

        let dir = cache.ensure_cached("Evil", "1.0.0", &registry).await.unwrap();
        assert!(dir.join("lib/net8.0/Good.dll").is_file());
        assert!(!tmp.path().join("escape.dll").exists());
        assert!(!tmp.path().join("packages/escape.dll").exists());
        // The entry still validates and is usable.
        assert!(PackageCache::entry_is_valid(&dir));
    }

    #[tokio::test]
    async fn test_directory_entries_create_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_in(tmp.path());
        let mut registry = FixtureRegistry::new();

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("pkg.nuspec", options).unwrap();
        writer
            .write_all(b"<package><metadata/></package>")
            .unwrap();
        writer.add_directory("lib/net8.0", options).unwrap();
        let archive = writer.finish().unwrap().into_inner();
        registry.insert_raw("Dirs", "1.0.0", archive);

        let dir = cache.ensure_cached("Dirs", "1.0.0", &registry).await.unwrap();
        assert!(dir.join("lib/net8.0").is_dir());
    }
}
