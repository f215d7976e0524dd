//! Request and response types for the CI API.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One build dispatch invocation. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub repo: String,
    pub branch: String,
    pub env: Vec<String>,
    pub source: String,
    /// Caller-supplied criteria narrowing which matrix entries get built.
    pub overrides: IndexMap<String, String>,
}

impl DispatchRequest {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            env: Vec::new(),
            source: "api".to_string(),
            overrides: IndexMap::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }
}

/// The CI API's acknowledgement of a submitted build request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedRequest {
    #[serde(rename = "@type")]
    pub kind: String,
    pub repository: RepositoryRef,
    pub request: RequestRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryRef {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestRef {
    pub id: u64,
}

/// Polled state of a submitted request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default)]
    pub builds: Vec<Build>,
}

impl RequestStatus {
    /// Terminal state: the request materialized into at least one build.
    pub fn is_resolved(&self) -> bool {
        self.kind == "request" && !self.builds.is_empty()
    }
}

/// A concrete build created from a resolved request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: u64,
    pub state: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Uniform outcome of a dispatch call, whichever path was taken.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub body: serde_json::Value,
}

impl DispatchResult {
    /// The request resolved into builds; `body` is the last polled response.
    pub fn resolved(status_code: u16, body: serde_json::Value) -> Self {
        Self {
            success: true,
            status_code: Some(status_code),
            body,
        }
    }

    /// Submission was rejected; `body` is the API response passed through.
    pub fn failed(status_code: u16, body: serde_json::Value) -> Self {
        Self {
            success: false,
            status_code: Some(status_code),
            body,
        }
    }

    /// The request was accepted but did not resolve within the poll budget.
    pub fn unresolved() -> Self {
        Self {
            success: false,
            status_code: None,
            body: serde_json::Value::Null,
        }
    }
}
