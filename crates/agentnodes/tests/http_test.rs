use agentcore::{Node, NodeContext, NodeError, Value};
use agentnodes::{send_with_retry, ApiRequestNode, NodeDefaults, RetryPolicy};
use base64::Engine;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn http_error(status: u16) -> NodeError {
    NodeError::Http {
        status,
        message: format!("status {}", status),
        retry_count: 0,
    }
}

fn request_context(config: Value) -> NodeContext {
    let mut ctx = NodeContext::detached("api");
    if let Value::Object(config) = config {
        ctx.config = config;
    }
    ctx
}

#[tokio::test]
async fn test_server_error_then_success_is_retried() {
    let calls = AtomicU32::new(0);
    let script = [Err(http_error(500)), Ok(200u16)];

    let (status, retries) = send_with_retry(&fast_policy(3), |attempt| {
        calls.fetch_add(1, Ordering::SeqCst);
        let outcome = script[attempt as usize].clone();
        async move { outcome }
    })
    .await
    .unwrap();

    assert_eq!(status, 200);
    assert!(retries >= 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let calls = AtomicU32::new(0);

    let err = send_with_retry(&fast_policy(3), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<u16, _>(http_error(404)) }
    })
    .await
    .unwrap_err();

    assert_eq!(err.retry_count(), 0);
    assert!(matches!(err, NodeError::Http { status: 404, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retries_stop_at_the_limit() {
    let calls = AtomicU32::new(0);

    let err = send_with_retry(&fast_policy(2), |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            Err::<u16, _>(NodeError::Network {
                message: "connection refused".into(),
                retry_count: 0,
            })
        }
    })
    .await
    .unwrap_err();

    assert_eq!(err.retry_count(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_request_with_bearer_auth_and_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/items")
        .match_header("authorization", "Bearer secret")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items": [1, 2]}"#)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/items", server.url()),
        "method": "GET",
        "queryParams": [{"key": "page", "value": "2"}],
        "auth": {"type": "bearer", "token": "secret"},
    }));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.value["data"], json!({"items": [1, 2]}));
    assert_eq!(output.value["status"], json!(200));
    assert_eq!(output.value["success"], json!(true));
    assert_eq!(output.value["metadata"]["retryCount"], json!(0));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_key_header_and_json_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/echo")
        .match_header("x-api-key", "k-123")
        .match_body(Matcher::Json(json!({"name": "flow"})))
        .with_status(201)
        .with_header("content-type", "text/plain")
        .with_body("created")
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/echo", server.url()),
        "method": "POST",
        "auth": {"type": "apiKey", "key": "k-123"},
    }))
    .with_input("body", json!({"name": "flow"}));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.value["data"], json!("created"));
    assert_eq!(output.value["status"], json!(201));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .with_body("nope")
        .expect(1)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/missing", server.url()),
        "retries": 3,
        "retryDelay": 1,
    }));

    let err = node.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Http { status: 404, retry_count: 0, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unavailable_service_is_retried_until_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/flaky", server.url()),
        "retries": 2,
        "retryDelay": 1,
    }));

    let err = node.execute(ctx).await.unwrap_err();
    assert!(matches!(err, NodeError::Http { status: 503, retry_count: 2, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_url_is_a_configuration_error() {
    let node = ApiRequestNode::new(NodeDefaults::default());
    let err = node.execute(request_context(json!({}))).await.unwrap_err();
    assert!(matches!(err, NodeError::Configuration(_)));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let mut server = Server::new_async().await;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("ada:lovelace")
    );
    let mock = server
        .mock("GET", "/private")
        .match_header("authorization", expected.as_str())
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/private", server.url()),
        "auth": {"type": "basic", "username": "ada", "password": "lovelace"},
    }));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.value["data"], json!("ok"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_custom_header_auth() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/custom")
        .match_header("x-custom-token", "t-42")
        .with_status(200)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/custom", server.url()),
        "auth": {"type": "custom", "headerName": "X-Custom-Token", "headerValue": "t-42"},
    }));

    node.execute(ctx).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_key_in_query_string() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("api_key".into(), "k-789".into()),
            Matcher::UrlEncoded("q".into(), "rust".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"hits": 1}"#)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/search", server.url()),
        "queryParams": {"q": "rust"},
        "auth": {"type": "apiKey", "key": "k-789", "location": "query"},
    }));

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.value["data"], json!({"hits": 1}));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_form_encoded_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/form")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("name".into(), "flow".into()),
            Matcher::UrlEncoded("count".into(), "2".into()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/form", server.url()),
        "method": "POST",
        "bodyType": "form",
        "body": {"name": "flow", "count": 2},
    }));

    node.execute(ctx).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_multipart_body_with_file_part() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/upload")
        .match_header("content-type", Matcher::Regex("^multipart/form-data; boundary=".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="file"; filename="notes.txt""#.into()),
            Matcher::Regex("remember the milk".into()),
            Matcher::Regex(r#"name="label""#.into()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/upload", server.url()),
        "method": "POST",
        "bodyType": "multipart",
        "body": {
            "label": "groceries",
            "file": {
                "data": base64::engine::general_purpose::STANDARD.encode("remember the milk"),
                "filename": "notes.txt",
                "mimeType": "text/plain",
            },
        },
    }));

    node.execute(ctx).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_raw_body_is_sent_verbatim() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/raw")
        .match_body(Matcher::Exact("<note>hi</note>".into()))
        .with_status(200)
        .create_async()
        .await;

    let node = ApiRequestNode::new(NodeDefaults::default());
    let ctx = request_context(json!({
        "url": format!("{}/raw", server.url()),
        "method": "PUT",
        "bodyType": "raw",
        "headers": {"Content-Type": "application/xml"},
        "body": "<note>hi</note>",
    }));

    node.execute(ctx).await.unwrap();
    mock.assert_async().await;
}
