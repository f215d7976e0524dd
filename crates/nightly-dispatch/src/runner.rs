//! Build request dispatch and resolution polling.

use crate::config::DispatchConfig;
use crate::manifest::ManifestClient;
use crate::matrix;
use chrono::Utc;
use nightly_core::{
    DispatchRequest, DispatchResult, Error, JobEntry, RequestStatus, Result, SubmittedRequest,
};
use serde_json::json;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, info, warn};

const API_VERSION_HEADER: &str = "Travis-API-Version";
const API_VERSION: &str = "3";

/// Dispatches build requests and waits for them to resolve into builds.
///
/// Each `Runner` owns its own HTTP clients; concurrent dispatch calls
/// share no mutable state.
pub struct Runner {
    client: reqwest::Client,
    manifests: ManifestClient,
    config: DispatchConfig,
}

impl Runner {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            manifests: ManifestClient::new(&config)?,
            config,
        })
    }

    /// Submit a build request and poll until it carries at least one
    /// build record or the poll budget elapses.
    ///
    /// Every failure path resolves to a well-formed [`DispatchResult`]:
    /// a rejected submission returns the API response unchanged, and a
    /// timed-out resolution returns an unresolved result rather than an
    /// error.
    pub async fn run(&self, request: &DispatchRequest) -> Result<DispatchResult> {
        let jobs = self.filtered_jobs(request).await;

        let url = format!(
            "{}/repo/{}%2F{}/requests",
            self.config.api_endpoint, self.config.owner, request.repo
        );
        let body = json!({
            "request": {
                "message": self.message(request),
                "branch": request.branch,
                "config": build_config(&request.env, &jobs),
            }
        });

        info!(
            repo = %request.repo,
            branch = %request.branch,
            jobs = jobs.len(),
            "submitting build request"
        );
        let response = self
            .authorized(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let payload = read_json(response).await?;

        if !status.is_success() {
            warn!(status = %status, repo = %request.repo, "build request rejected");
            return Ok(DispatchResult::failed(status.as_u16(), payload));
        }

        let submitted: SubmittedRequest = serde_json::from_value(payload)?;
        self.await_builds(&submitted).await
    }

    /// Narrow the remote matrix when override criteria were supplied.
    /// An empty override map skips the manifest fetch entirely.
    async fn filtered_jobs(&self, request: &DispatchRequest) -> Vec<JobEntry> {
        if request.overrides.is_empty() {
            return Vec::new();
        }
        match self.manifests.fetch(&request.repo, &request.branch).await {
            Some(text) => matrix::filter(&text, &request.overrides),
            None => Vec::new(),
        }
    }

    /// Poll the submitted request until terminal or the budget elapses.
    /// The deadline is computed once at entry and checked before each
    /// attempt; an attempt still in flight at the deadline is abandoned.
    async fn await_builds(&self, submitted: &SubmittedRequest) -> Result<DispatchResult> {
        let url = format!(
            "{}/repo/{}/request/{}",
            self.config.api_endpoint, submitted.repository.id, submitted.request.id
        );
        let deadline = Instant::now() + self.config.poll_budget;

        while Instant::now() < deadline {
            match timeout_at(deadline, self.poll_once(&url)).await {
                Ok(Some((code, payload, status))) if status.is_resolved() => {
                    info!(%url, builds = status.builds.len(), "request resolved into builds");
                    return Ok(DispatchResult::resolved(code, payload));
                }
                Ok(Some(_)) => debug!(%url, "request still pending"),
                Ok(None) => debug!(%url, "poll attempt failed, will retry"),
                Err(_) => break,
            }
            sleep_until(deadline.min(Instant::now() + self.config.poll_interval)).await;
        }

        info!(%url, "poll budget exhausted before any build materialized");
        Ok(DispatchResult::unresolved())
    }

    /// One poll attempt. Transport and parse failures are non-terminal;
    /// the loop keeps trying until the deadline.
    async fn poll_once(&self, url: &str) -> Option<(u16, serde_json::Value, RequestStatus)> {
        let response = self.authorized(self.client.get(url)).send().await.ok()?;
        let code = response.status().as_u16();
        let payload: serde_json::Value = response.json().await.ok()?;
        let status: RequestStatus = serde_json::from_value(payload.clone()).ok()?;
        Some((code, payload, status))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(API_VERSION_HEADER, API_VERSION).header(
            reqwest::header::AUTHORIZATION,
            format!("token {}", self.config.api_token),
        )
    }

    fn message(&self, request: &DispatchRequest) -> String {
        let mut message = format!(
            "Build repo={}; branch={}; source={}",
            request.repo, request.branch, request.source
        );
        if !request.env.is_empty() {
            message.push_str(&format!("; ({})", request.env.join(" ")));
        }
        message.push(' ');
        message.push_str(&Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
        message
    }
}

/// Assemble the request's `config` object.
///
/// Empty when there is nothing to restrict; otherwise a deep-merge set
/// carrying the global env and the filtered matrix, each key emitted
/// only when it has content.
fn build_config(env: &[String], jobs: &[JobEntry]) -> serde_json::Value {
    if env.is_empty() && jobs.is_empty() {
        return json!({});
    }

    let mut config = serde_json::Map::new();
    config.insert("merge_mode".to_string(), json!("deep_merge"));
    if !env.is_empty() {
        config.insert("env".to_string(), json!({ "global": env }));
    }
    if !jobs.is_empty() {
        config.insert("jobs".to_string(), json!({ "include": jobs }));
    }
    serde_json::Value::Object(config)
}

/// Read the response body, preserving non-JSON payloads verbatim so
/// failed submissions pass through unchanged.
async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let text = response
        .text()
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}
