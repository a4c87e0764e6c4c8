//! Integration tests for the retrying fetch client against a mock server

use serde_json::Value;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_harvester::fetcher::http::FetchClient;
use catalog_harvester::fetcher::FetcherError;
use catalog_harvester::harvester::{HttpConfig, RateLimiter};

fn client(max_retries: u32) -> FetchClient {
    let config = HttpConfig {
        max_retries,
        ..HttpConfig::immediate()
    };
    FetchClient::new(config, Arc::new(RateLimiter::new(1000.0, 1000.0))).unwrap()
}

#[tokio::test]
async fn test_succeeds_after_two_transient_failures() {
    let server = MockServer::start().await;

    // Registered first, so it answers until exhausted.
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;

    let body: Value = client(3)
        .get_json(&format!("{}/data", server.uri()), &[], false)
        .await
        .unwrap();

    assert_eq!(body["ok"], true);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client(2)
        .get_text(&format!("{}/data", server.uri()), &[], false)
        .await;

    match result {
        Err(FetcherError::TransientFailure { attempts, message }) => {
            assert_eq!(attempts, 3);
            assert!(message.contains("500"));
        }
        other => panic!("expected transient failure, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_rate_limit_does_not_consume_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    // No standard retries at all: only the rate-limit path can get us through.
    let client = client(0);
    let text = client
        .get_text(&format!("{}/data", server.uri()), &[], false)
        .await
        .unwrap();

    assert_eq!(text, "done");
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
    assert!(client.rate_limiter().current_rate() < client.rate_limiter().base_rate());
}

#[tokio::test]
async fn test_persistent_rate_limiting_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let config = HttpConfig {
        max_rate_limit_waits: 2,
        ..HttpConfig::immediate()
    };
    let client = FetchClient::new(config, Arc::new(RateLimiter::new(1000.0, 1000.0))).unwrap();
    let result = client
        .get(&format!("{}/data", server.uri()), &[], false)
        .await;

    assert!(matches!(
        result,
        Err(FetcherError::RateLimitExceeded { waits: 2 })
    ));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_transient_failure_resets_rate_limit_streak() {
    let server = MockServer::start().await;
    // 429, 429, 503, 429, 429, 200: mocks answer in mount order until exhausted.
    for (status, times) in [(429, 2), (503, 1), (429, 2)] {
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(status).insert_header("Retry-After", "0"))
            .up_to_n_times(times)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .mount(&server)
        .await;

    let config = HttpConfig {
        max_retries: 1,
        max_rate_limit_waits: 2,
        ..HttpConfig::immediate()
    };
    let client = FetchClient::new(config, Arc::new(RateLimiter::new(1000.0, 1000.0))).unwrap();
    let text = client
        .get_text(&format!("{}/data", server.uri()), &[], false)
        .await
        .unwrap();

    assert_eq!(text, "done");
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_query_params_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/"))
        .and(query_param("page", "7"))
        .and(query_param("category1", "998"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let text = client(0)
        .get_text(
            &format!("{}/search/", server.uri()),
            &[("category1", "998".to_string()), ("page", "7".to_string())],
            false,
        )
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn test_undecodable_json_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let result: Result<Value, _> = client(0).get_json(&server.uri(), &[], false).await;
    assert!(matches!(result, Err(FetcherError::ParseError(_))));
}
