//! End-to-end dispatch tests against mock CI API and manifest hosts.

use std::time::Duration;

use nightly_core::DispatchRequest;
use nightly_dispatch::{DispatchConfig, Runner};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nightly_dispatch=debug")
        .with_test_writer()
        .try_init();
}

fn test_config(api: &MockServer, manifests: &MockServer) -> DispatchConfig {
    DispatchConfig {
        api_endpoint: api.uri(),
        api_token: "secret".to_string(),
        owner: "travis-ci".to_string(),
        manifest_host: manifests.uri(),
        manifest_token: None,
        poll_interval: Duration::from_millis(10),
        poll_budget: Duration::from_secs(2),
    }
}

fn submission_ack() -> Value {
    json!({
        "@type": "pending",
        "remaining_requests": 1,
        "repository": {"@type": "repository", "id": 39521, "slug": "travis-ci/example"},
        "request": {"id": 205729},
    })
}

fn resolved_status() -> Value {
    json!({
        "@type": "request",
        "id": 205729,
        "builds": [{"id": 1201, "state": "created", "started_at": null, "finished_at": null}],
    })
}

async fn mount_submission(api: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/repo/travis-ci%2Fexample/requests"))
        .and(header("Travis-API-Version", "3"))
        .and(header("Authorization", "token secret"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(202).set_body_json(submission_ack()))
        .expect(1)
        .mount(api)
        .await;
}

async fn mount_resolved_poll(api: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .and(header("Travis-API-Version", "3"))
        .and(header("Authorization", "token secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resolved_status()))
        .mount(api)
        .await;
}

/// The request body of the single POST the API server received.
async fn submitted_body(api: &MockServer) -> Value {
    let requests = api.received_requests().await.expect("recording enabled");
    let post = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("one submission");
    serde_json::from_slice(&post.body).expect("JSON body")
}

#[tokio::test]
async fn empty_overrides_skip_manifest_and_send_empty_config() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    // The manifest host must never be contacted.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&manifests)
        .await;
    mount_submission(&api).await;
    mount_resolved_poll(&api).await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(result.success);
    let body = submitted_body(&api).await;
    assert_eq!(body["request"]["config"], json!({}));
    assert_eq!(body["request"]["branch"], json!("main"));
}

#[tokio::test]
async fn env_list_becomes_global_config_and_message_suffix() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    mount_submission(&api).await;
    mount_resolved_poll(&api).await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let request = DispatchRequest::new("example", "main")
        .with_source("cron")
        .with_env(vec!["NIGHTLY=yes".to_string(), "CHANNEL=beta".to_string()]);
    let result = runner.run(&request).await.unwrap();

    assert!(result.success);
    let body = submitted_body(&api).await;
    assert_eq!(
        body["request"]["config"],
        json!({
            "merge_mode": "deep_merge",
            "env": {"global": ["NIGHTLY=yes", "CHANNEL=beta"]},
        })
    );
    let message = body["request"]["message"].as_str().unwrap();
    assert!(message.contains("repo=example"));
    assert!(message.contains("branch=main"));
    assert!(message.contains("source=cron"));
    assert!(message.contains("(NIGHTLY=yes CHANNEL=beta)"));
}

#[tokio::test]
async fn overrides_filter_remote_matrix_into_jobs_include() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/travis-ci/example/main/.travis.yml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "\
language: c
matrix:
  include:
    - os: linux
      dist: xenial
      arch: x86_64
    - os: osx
",
        ))
        .expect(1)
        .mount(&manifests)
        .await;
    mount_submission(&api).await;
    mount_resolved_poll(&api).await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let request = DispatchRequest::new("example", "main").with_override("os", "osx");
    let result = runner.run(&request).await.unwrap();

    assert!(result.success);
    let body = submitted_body(&api).await;
    assert_eq!(
        body["request"]["config"],
        json!({
            "merge_mode": "deep_merge",
            "jobs": {"include": [{"os": "osx", "osx_image": "xcode9.4"}]},
        })
    );
}

#[tokio::test]
async fn unavailable_manifest_sends_no_restriction() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&manifests)
        .await;
    mount_submission(&api).await;
    mount_resolved_poll(&api).await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let request = DispatchRequest::new("example", "main").with_override("os", "osx");
    let result = runner.run(&request).await.unwrap();

    assert!(result.success);
    let body = submitted_body(&api).await;
    assert_eq!(body["request"]["config"], json!({}));
}

#[tokio::test]
async fn rejected_submission_returns_without_polling() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repo/travis-ci%2Fexample/requests"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"error": "no permission"})),
        )
        .expect(1)
        .mount(&api)
        .await;
    // The polling endpoint must never be hit.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&api)
        .await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status_code, Some(422));
    assert_eq!(result.body, json!({"error": "no permission"}));
}

#[tokio::test]
async fn polls_until_request_resolves_into_builds() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    mount_submission(&api).await;
    // Two pending responses, then a resolved one.
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"@type": "pending", "builds": []})),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resolved_status()))
        .expect(1)
        .mount(&api)
        .await;

    let runner = Runner::new(test_config(&api, &manifests)).unwrap();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.body["builds"][0]["id"], json!(1201));
}

#[tokio::test]
async fn poll_budget_exhaustion_yields_unresolved_result() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    mount_submission(&api).await;
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"@type": "pending", "builds": []})),
        )
        .mount(&api)
        .await;

    let mut config = test_config(&api, &manifests);
    config.poll_budget = Duration::from_millis(150);
    let runner = Runner::new(config).unwrap();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status_code, None);
    assert_eq!(result.body, Value::Null);
}

#[tokio::test]
async fn poll_interval_never_extends_past_budget() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    mount_submission(&api).await;
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"@type": "pending", "builds": []})),
        )
        .mount(&api)
        .await;

    // An interval far beyond the budget must not delay the deadline.
    let mut config = test_config(&api, &manifests);
    config.poll_interval = Duration::from_secs(30);
    config.poll_budget = Duration::from_millis(100);
    let runner = Runner::new(config).unwrap();

    let started = std::time::Instant::now();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status_code, None);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn poll_transport_errors_are_swallowed_until_budget() {
    init_tracing();
    let api = MockServer::start().await;
    let manifests = MockServer::start().await;

    mount_submission(&api).await;
    // Unparseable poll responses count as non-terminal, not as errors.
    Mock::given(method("GET"))
        .and(path("/repo/39521/request/205729"))
        .respond_with(ResponseTemplate::new(500).set_body_string("bad gateway"))
        .mount(&api)
        .await;

    let mut config = test_config(&api, &manifests);
    config.poll_budget = Duration::from_millis(100);
    let runner = Runner::new(config).unwrap();
    let result = runner
        .run(&DispatchRequest::new("example", "main"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status_code, None);
}
