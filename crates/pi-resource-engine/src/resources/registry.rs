use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ResourceError;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// Latest-version lookup for npm packages.
#[async_trait]
pub trait NpmRegistry: Send + Sync {
    async fn latest_version(&self, name: &str) -> Result<String, ResourceError>;
}

#[derive(Debug, Deserialize)]
struct LatestManifest {
    version: String,
}

/// Queries `<registry>/<name>/latest` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpNpmRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNpmRegistry {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REGISTRY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn latest_url(&self, name: &str) -> String {
        format!("{}/{name}/latest", self.base_url)
    }
}

impl Default for HttpNpmRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

#[async_trait]
impl NpmRegistry for HttpNpmRegistry {
    async fn latest_version(&self, name: &str) -> Result<String, ResourceError> {
        let response = self
            .client
            .get(self.latest_url(name))
            .send()
            .await?
            .error_for_status()?;
        let manifest: LatestManifest = response.json().await?;
        Ok(manifest.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_url_handles_scoped_names_and_trailing_slash() {
        let registry = HttpNpmRegistry::new("https://registry.example.com/");
        assert_eq!(
            registry.latest_url("@scope/pkg"),
            "https://registry.example.com/@scope/pkg/latest"
        );
    }
}
