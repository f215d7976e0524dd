//! Build-manifest retrieval.

use crate::config::DispatchConfig;
use nightly_core::{Error, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

/// Manifest filename resolved under `{host}/{owner}/{repo}/{branch}/`.
pub const MANIFEST_FILE: &str = ".travis.yml";

const MAX_REDIRECTS: usize = 5;

/// HTTP client for fetching raw build manifests.
pub struct ManifestClient {
    client: reqwest::Client,
    host: String,
    owner: String,
    token: Option<String>,
}

impl ManifestClient {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            host: config.manifest_host.clone(),
            owner: config.owner.clone(),
            token: config.manifest_token.clone(),
        })
    }

    /// Fetch a repository's manifest for a branch.
    ///
    /// A missing or private manifest must not abort the dispatch, so any
    /// non-success status or transport failure yields `None` and the
    /// caller proceeds without matrix filtering.
    pub async fn fetch(&self, repo: &str, branch: &str) -> Option<String> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.host, self.owner, repo, branch, MANIFEST_FILE
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                debug!(%url, status = %response.status(), "manifest unavailable, skipping matrix filter");
                None
            }
            Err(e) => {
                warn!(%url, error = %e, "manifest fetch failed, skipping matrix filter");
                None
            }
        }
    }
}
