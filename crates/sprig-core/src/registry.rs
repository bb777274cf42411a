//! npm registry client and response documents.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::ResolveError;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable to override the registry URL.
pub const REGISTRY_ENV: &str = "SPRIG_NPM_REGISTRY";

/// Full package metadata document: every published version of a package.
///
/// Only the `versions` keys are needed to enumerate candidates; the values
/// carry the per-version manifests the registry happens to inline.
#[derive(Debug, Clone, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub versions: BTreeMap<String, Manifest>,
}

/// One concrete version's document: its name, version, and declared
/// direct dependencies as `name -> range` pairs.
///
/// `dependencies` is absent for leaf packages, so it defaults to empty.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

/// Registry client for fetching packuments and per-version manifests.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a new registry client with the given base URL.
    pub fn new(base_url: &str) -> Result<Self, ResolveError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ResolveError::internal(format!("invalid registry URL '{base_url}': {e}"))
        })?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("sprig/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Create a client using the registry URL from the environment or default.
    pub fn from_env() -> Result<Self, ResolveError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch the packument (all published versions) for a package.
    pub async fn fetch_packument(&self, name: &str) -> Result<Packument, ResolveError> {
        let url = self.package_url(name, None)?;
        let response = self.http.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(ResolveError::Network(format!(
                "registry returned status {} for '{name}'",
                response.status()
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ResolveError::parse(name, e.to_string()))
    }

    /// Fetch the manifest for one concrete version of a package.
    pub async fn fetch_manifest(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Manifest, ResolveError> {
        let url = self.package_url(name, Some(version))?;
        let response = self.http.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(format!("{name}@{version}")));
        }
        if !response.status().is_success() {
            return Err(ResolveError::Network(format!(
                "registry returned status {} for '{name}@{version}'",
                response.status()
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ResolveError::parse(name, e.to_string()))
    }

    fn package_url(&self, name: &str, version: Option<&str>) -> Result<Url, ResolveError> {
        // URL-encode the slash in scoped package names
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        let path = match version {
            Some(v) => format!("{encoded_name}/{v}"),
            None => encoded_name,
        };

        self.base_url
            .join(&path)
            .map_err(|e| ResolveError::internal(format!("failed to build URL for '{name}': {e}")))
    }
}
