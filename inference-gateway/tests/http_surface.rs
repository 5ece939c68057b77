//! End-to-end tests against the real HTTP surface, driven with `axum-test`
//! (a full request/response round trip, no manual `Router::oneshot` wiring)
//! and spot-checked with `tokio-test`'s assertion macros. Unlike
//! `server.rs`'s `#[cfg(test)]` unit tests, these only see this crate's
//! `pub` surface, exactly as an external client would.

use axum_test::TestServer;
use inference_gateway::fixtures::{
    engine_with_mock_provider, engine_with_streaming_provider, test_config, test_config_with_api_key,
};
use inference_gateway::{create_server_with_engine, GatewayConfig};

async fn server(config: GatewayConfig) -> TestServer {
    let engine = engine_with_mock_provider(&config).await;
    let app = create_server_with_engine(config, engine).await.unwrap();
    TestServer::new(app).expect("axum-test server should build from a valid router")
}

async fn streaming_server(config: GatewayConfig) -> TestServer {
    let engine = engine_with_streaming_provider(&config).await;
    let app = create_server_with_engine(config, engine).await.unwrap();
    TestServer::new(app).expect("axum-test server should build from a valid router")
}

fn completion_body() -> serde_json::Value {
    serde_json::json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "hi"}],
    })
}

#[tokio::test]
async fn completion_against_a_registered_provider_returns_its_response() {
    let server = server(test_config()).await;
    let response = server
        .post("/v1/inference/completions")
        .json(&completion_body())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["content"], "mock response");
}

#[tokio::test]
async fn streamed_completion_ends_with_a_done_sentinel() {
    let server = streaming_server(test_config()).await;
    let body = completion_body();
    let response = server
        .post("/v1/inference/completions/stream")
        .json(&body)
        .await;
    response.assert_status_ok();
    let text = response.text();
    assert!(
        text.trim_end().ends_with("data: [DONE]"),
        "SSE stream must terminate with a [DONE] event, got: {text}"
    );
}

#[tokio::test]
async fn async_submission_is_retrievable_and_eventually_completes() {
    let server = server(test_config()).await;
    let submit = server
        .post("/v1/inference/async")
        .json(&completion_body())
        .await;
    submit.assert_status_ok();
    let job_id = submit.json::<serde_json::Value>()["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let job = server
            .get(&format!("/v1/inference/async/{job_id}"))
            .await;
        job.assert_status_ok();
        let body: serde_json::Value = job.json();
        if body["state"] == "COMPLETED" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "async job did not complete in time"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn providers_endpoint_lists_the_registered_mock_provider() {
    let server = server(test_config()).await;
    let response = server.get("/v1/providers").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"mock"));
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_when_api_keys_are_configured() {
    let config = test_config_with_api_key("sk-test", "tenant-a");
    let server = server(config).await;
    let response = server.get("/v1/providers").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn configured_bearer_token_is_accepted() {
    let config = test_config_with_api_key("sk-test", "tenant-a");
    let server = server(config).await;
    let response = server
        .get("/v1/providers")
        .add_header(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer sk-test"),
        )
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn create_server_with_engine_builds_successfully_from_valid_config() {
    let config = test_config();
    let engine = engine_with_mock_provider(&config).await;
    let result = create_server_with_engine(config, engine).await;
    tokio_test::assert_ok!(result);
}
