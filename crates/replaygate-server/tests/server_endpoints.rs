mod common;

use serde_json::Value;

#[tokio::test]
async fn server_endpoints_work() {
    let server = common::start_server().await;
    let client = reqwest::Client::new();

    // GET /
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["service"], "replaygate");
    assert_eq!(body["status"], "ok");

    // GET /health/live
    let resp = client.get(server.url("/health/live")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET /health/ready
    let resp = client.get(server.url("/health/ready")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["todos"], 0);
    assert_eq!(body["idempotency"]["enabled"], true);
    assert_eq!(body["idempotency"]["entries"], 0);

    // GET /metrics
    let resp = client.get(server.url("/metrics")).send().await.unwrap();
    assert!(resp.status().is_success());
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_owned();
    assert!(content_type.starts_with("text/plain"));
    let text = resp.text().await.unwrap();
    assert!(text.contains("http_requests_total"));

    // Unknown route
    let resp = client.get(server.url("/nope")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn request_id_is_echoed() {
    let server = common::start_server().await;
    let resp = reqwest::Client::new()
        .get(server.url("/health/live"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req-42");
    server.stop().await;
}
