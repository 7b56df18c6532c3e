//! Tests for the REST job store client.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vtrack_models::{classify, JobId, ScopeId, Stage};

use crate::client::{RestJobStore, StoreConfig};
use crate::error::StoreError;
use crate::retry::RetryConfig;
use crate::store::JobStore;

// =============================================================================
// Test Helpers
// =============================================================================

fn test_store(server: &MockServer) -> RestJobStore {
    let config = StoreConfig::new(&server.uri(), "test-key")
        .unwrap()
        .with_retry(RetryConfig {
            fetch_max_retries: 1,
            retry_request_max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        });
    RestJobStore::new(config).unwrap()
}

fn video_rows() -> serde_json::Value {
    json!([
        {
            "id": "v1",
            "project_id": "p1",
            "original_name": "intro.mp4",
            "created_at": "2024-05-01T10:00:00+00:00",
            "video_analysis": [{"status": "queued", "queue_position": 3}]
        },
        {
            "id": "v2",
            "project_id": "p1",
            "original_name": "broken.mov",
            "created_at": "2024-05-01T10:01:00+00:00",
            "video_analysis": [{"status": "failed", "error_message": "decode failure"}]
        }
    ])
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn test_fetch_records_parses_rows() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .and(query_param("project_id", "eq.p1"))
        .and(query_param("order", "created_at.desc"))
        .and(header("apikey", "test-key"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_rows()))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let records = store.fetch_records(&ScopeId::from("p1")).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(classify(&records[0]), Stage::Queued);
    assert_eq!(classify(&records[1]), Stage::Failed);
    assert_eq!(records[1].error.as_deref(), Some("decode failure"));
}

#[tokio::test]
async fn test_fetch_retries_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let records = store.fetch_records(&ScopeId::from("p1")).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_fetch_does_not_retry_bad_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad filter"))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let err = store.fetch_records(&ScopeId::from("p1")).await.unwrap_err();
    assert!(matches!(err, StoreError::RequestFailed(_)));
    assert!(err.to_string().contains("bad filter"));
}

#[tokio::test]
async fn test_fetch_honours_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_rows()))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let records = store.fetch_records(&ScopeId::from("p1")).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_fetch_leaves_long_rate_limit_to_next_pass() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/videos"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "60"))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let err = store.fetch_records(&ScopeId::from("p1")).await.unwrap_err();
    assert!(matches!(err, StoreError::RateLimited(60_000)));
}

// =============================================================================
// Retry requests
// =============================================================================

#[tokio::test]
async fn test_request_retry_resets_analysis_row() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_analysis"))
        .and(query_param("video_id", "eq.v2"))
        .and(body_partial_json(json!({
            "status": "queued",
            "error_message": null,
            "retry_context": "codec pack updated"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"video_id": "v2"}])))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    store
        .request_retry(&JobId::from("v2"), Some("codec pack updated"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_request_retry_unknown_job() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_analysis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let err = store.request_retry(&JobId::from("nope"), None).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_request_retry_permission_denied() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/video_analysis"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let err = store.request_retry(&JobId::from("v2"), None).await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_config_rejects_invalid_url() {
    let err = StoreConfig::new("not a url", "key").unwrap_err();
    assert!(matches!(err, StoreError::Config(_)));
}

#[test]
#[serial]
fn test_config_from_env_requires_url() {
    std::env::remove_var("JOB_STORE_URL");
    std::env::set_var("JOB_STORE_API_KEY", "key");
    assert!(StoreConfig::from_env().is_err());
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    std::env::set_var("JOB_STORE_URL", "https://store.example.com");
    std::env::set_var("JOB_STORE_API_KEY", "key");
    std::env::remove_var("JOB_STORE_TIMEOUT_SECS");
    std::env::remove_var("JOB_STORE_CONNECT_TIMEOUT_SECS");

    let config = StoreConfig::from_env().unwrap();
    assert_eq!(config.timeout, Duration::from_secs(15));
    assert_eq!(config.connect_timeout, Duration::from_secs(5));
    assert_eq!(config.base_url.as_str(), "https://store.example.com/");
}
