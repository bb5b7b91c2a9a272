//! NuGet registry client.
//!
//! Two operations against the v3 endpoints of nuget.org:
//! - latest-version lookup, through the search service with a flat-container
//!   fallback,
//! - package archive download from the flat container.
//!
//! The client performs no caching; cache policy belongs to the package cache.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default search service endpoint.
pub const SEARCH_URL: &str = "https://azuresearch-usnc.nuget.org/query";

/// Default flat-container endpoint.
pub const FLAT_CONTAINER_URL: &str = "https://api.nuget.org/v3-flatcontainer";

/// Errors that can occur talking to the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("package '{id}' not found on the registry")]
    NotFound { id: String },

    #[error("registry returned status {status} for '{url}'")]
    Status { url: String, status: u16 },

    #[error("could not resolve a version for package '{id}'")]
    VersionResolution { id: String },
}

/// Registry operations needed by the resolution pipeline.
///
/// Production code uses [`NugetClient`]; tests substitute in-memory
/// implementations serving fixture archives.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve the latest published version of a package.
    async fn latest_version(&self, id: &str) -> Result<String, RegistryError>;

    /// Download the full archive bytes for a package version.
    async fn download_archive(&self, id: &str, version: &str) -> Result<Vec<u8>, RegistryError>;
}

/// Search service response shape (only the fields we read).
#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    version: String,
}

/// Flat-container version index.
#[derive(Debug, Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

/// HTTP client for the public NuGet registry.
pub struct NugetClient {
    client: reqwest::Client,
    search_url: String,
    flat_container_url: String,
}

impl NugetClient {
    /// Create a client against the public nuget.org endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_endpoints(SEARCH_URL, FLAT_CONTAINER_URL)
    }

    /// Create a client against custom endpoints (used by tests against a
    /// local server).
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn with_endpoints(
        search_url: impl Into<String>,
        flat_container_url: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("csrun/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            search_url: search_url.into(),
            flat_container_url: flat_container_url.into(),
        })
    }

    /// Latest version according to the search service: `data[0].version`.
    async fn latest_from_search(&self, id: &str) -> Result<String, RegistryError> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("q", format!("packageid:{}", id.to_lowercase())), ("take", "1".to_string())])
            .send()
            .await?;
        let url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body: SearchResponse = response.json().await?;
        body.data
            .into_iter()
            .next()
            .map(|r| r.version)
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Latest version according to the flat container: `versions[last]`.
    async fn latest_from_index(&self, id: &str) -> Result<String, RegistryError> {
        let url = format!(
            "{}/{}/index.json",
            self.flat_container_url,
            id.to_lowercase()
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound { id: id.to_string() });
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body: VersionIndex = response.json().await?;
        body.versions
            .into_iter()
            .next_back()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }
}

#[async_trait]
impl Registry for NugetClient {
    async fn latest_version(&self, id: &str) -> Result<String, RegistryError> {
        match self.latest_from_search(id).await {
            Ok(version) => Ok(version),
            Err(search_err) => {
                debug!(%id, error = %search_err, "search lookup failed, trying flat container");
                self.latest_from_index(id)
                    .await
                    .map_err(|_| RegistryError::VersionResolution { id: id.to_string() })
            }
        }
    }

    async fn download_archive(&self, id: &str, version: &str) -> Result<Vec<u8>, RegistryError> {
        let id = id.to_lowercase();
        let version = version.to_lowercase();
        let url = format!(
            "{}/{id}/{version}/{id}.{version}.nupkg",
            self.flat_container_url
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound { id });
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
