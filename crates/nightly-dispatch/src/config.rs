//! Dispatch configuration with layered resolution.
//!
//! Values resolve in order: YAML config file (when present), then
//! environment variables. Required values missing from both layers fail
//! loudly; optional values fall back to documented defaults.

use nightly_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_OWNER: &str = "travis-ci";
const DEFAULT_MANIFEST_HOST: &str = "https://raw.githubusercontent.com";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
const DEFAULT_POLL_BUDGET_SECS: u64 = 30;

/// Resolved configuration for one dispatch engine instance.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// CI API base URL.
    pub api_endpoint: String,
    /// CI API auth token, sent as `Authorization: token …`.
    pub api_token: String,
    /// Organization name substituted into repository slugs.
    pub owner: String,
    /// Host serving raw build manifests.
    pub manifest_host: String,
    /// Optional bearer credential for private manifests.
    pub manifest_token: Option<String>,
    /// Delay between resolution poll attempts.
    pub poll_interval: Duration,
    /// Overall budget for resolution polling.
    pub poll_budget: Duration,
}

/// Partial configuration as read from one layer.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    api_endpoint: Option<String>,
    api_token: Option<String>,
    owner: Option<String>,
    manifest_host: Option<String>,
    manifest_token: Option<String>,
    poll_interval_secs: Option<u64>,
    poll_budget_secs: Option<u64>,
}

impl RawConfig {
    fn from_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
            }
            _ => Ok(Self::default()),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from an optional file path plus the process
    /// environment (`NIGHTLY_*` variables override file values).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let raw = RawConfig::from_file(path)?;
        Self::resolve(raw, |key| {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        })
    }

    fn resolve(mut raw: RawConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        overlay(&mut raw.api_endpoint, env("NIGHTLY_API_ENDPOINT"));
        overlay(&mut raw.api_token, env("NIGHTLY_API_TOKEN"));
        overlay(&mut raw.owner, env("NIGHTLY_OWNER"));
        overlay(&mut raw.manifest_host, env("NIGHTLY_MANIFEST_HOST"));
        overlay(&mut raw.manifest_token, env("NIGHTLY_MANIFEST_TOKEN"));

        Ok(Self {
            api_endpoint: raw
                .api_endpoint
                .map(|url| url.trim_end_matches('/').to_string())
                .ok_or(Error::MissingConfig("api_endpoint"))?,
            api_token: raw.api_token.ok_or(Error::MissingConfig("api_token"))?,
            owner: raw.owner.unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            manifest_host: raw
                .manifest_host
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_MANIFEST_HOST.to_string()),
            manifest_token: raw.manifest_token,
            poll_interval: Duration::from_secs(
                raw.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            poll_budget: Duration::from_secs(
                raw.poll_budget_secs.unwrap_or(DEFAULT_POLL_BUDGET_SECS),
            ),
        })
    }
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}
