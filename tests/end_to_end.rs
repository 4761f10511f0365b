//! End-to-end tests over real sockets.

use reqwest::{Method, StatusCode};
use std::time::Duration;

use microweb::config::{MappingConfig, MiddlewareConfig};
use microweb::http::ServerState;

mod common;

fn middleware(name: &str, kind: &str, params: serde_json::Value) -> MiddlewareConfig {
    let params = match params {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Default::default(),
    };
    MiddlewareConfig {
        name: name.to_string(),
        kind: kind.to_string(),
        params,
    }
}

fn url_mapping(middleware: &str, pattern: &str) -> MappingConfig {
    MappingConfig {
        middleware: middleware.to_string(),
        url_pattern: Some(pattern.to_string()),
        handler_name: None,
        dispatch: Vec::new(),
        match_after: true,
    }
}

#[tokio::test]
async fn test_static_resource_is_loaded_once() {
    let server = common::start_server(common::local_config()).await;
    let client = reqwest::Client::new();

    let first = client.get(server.url("/index.html")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["content-type"], "text/html");
    assert_eq!(first.text().await.unwrap(), common::INDEX_HTML);
    assert_eq!(server.loads(), 1);

    let second = client.get(server.url("/index.html")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.text().await.unwrap(), common::INDEX_HTML);
    assert_eq!(server.loads(), 1, "second request must be a cache hit");

    // The root resolves to the same cached index.
    let root = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(root.text().await.unwrap(), common::INDEX_HTML);
    assert_eq!(server.loads(), 1);
    assert_eq!(server.app_calls(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_missing_resource_is_cached_negatively() {
    let server = common::start_server(common::local_config()).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let response = client.get(server.url("/missing.js")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(server.loads(), 1);
    assert_eq!(server.server.cache().stats().negative, 1);

    let css = client.get(server.url("/css/site.css")).send().await.unwrap();
    assert_eq!(css.status(), StatusCode::OK);
    assert_eq!(css.headers()["content-type"], "text/css");
    assert_eq!(css.text().await.unwrap(), common::SITE_CSS);

    server.stop().await;
}

#[tokio::test]
async fn test_reject_middleware_short_circuits() {
    let mut config = common::local_config();
    config.middleware.push(middleware(
        "deny",
        "reject",
        serde_json::json!({ "status": 403, "message": "forbidden" }),
    ));
    config.mapping.push(url_mapping("deny", "/secure/*"));
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let denied = client.get(server.url("/secure/data")).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert_eq!(denied.text().await.unwrap(), "forbidden");
    assert_eq!(server.app_calls(), 0, "terminal handler must not run");

    let allowed = client.get(server.url("/securely")).send().await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(server.app_calls(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_response_header_middleware_applies_to_static_and_dynamic() {
    let mut config = common::local_config();
    config.middleware.push(middleware(
        "powered",
        "response_header",
        serde_json::json!({ "name": "x-powered-by", "value": "microweb" }),
    ));
    config.middleware.push(middleware("log", "access_log", serde_json::json!({})));
    config.mapping.push(url_mapping("powered", "/*"));
    config.mapping.push(url_mapping("log", "/*"));
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let dynamic = client.get(server.url("/api/items")).send().await.unwrap();
    assert_eq!(dynamic.headers()["x-powered-by"], "microweb");

    let asset = client.get(server.url("/css/site.css")).send().await.unwrap();
    assert_eq!(asset.status(), StatusCode::OK);
    assert_eq!(asset.headers()["x-powered-by"], "microweb");

    server.stop().await;
}

#[tokio::test]
async fn test_query_parameters_and_context_path() {
    let mut config = common::local_config();
    config.context.context_path = "/shop".to_string();
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/shop/api/items?id=1,2;id=3&flag"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "path=/api/items id=1,2,3 flag=");

    let index = client.get(server.url("/shop")).send().await.unwrap();
    assert_eq!(index.text().await.unwrap(), common::INDEX_HTML);

    server.stop().await;
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = common::start_server(common::local_config()).await;
    let client = reqwest::Client::new();

    let generated = client.get(server.url("/api")).send().await.unwrap();
    let id = generated.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let supplied = client
        .get(server.url("/api"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(supplied.headers()["x-request-id"], "abc-123");

    server.stop().await;
}

#[tokio::test]
async fn test_protocol_errors() {
    let mut config = common::local_config();
    config.http.max_body_bytes = 64;
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let trace = client
        .request(Method::TRACE, server.url("/api"))
        .send()
        .await
        .unwrap();
    assert_eq!(trace.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(trace.headers()["allow"].to_str().unwrap().contains("GET"));

    let large = client
        .post(server.url("/upload"))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(server.app_calls(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_overload_fails_fast() {
    let mut config = common::local_config();
    config.executor.core_pool_size = 1;
    config.executor.max_pool_size = 1;
    config.executor.queue_depth = 1;
    let server = common::start_server(config).await;

    // One job running, one queued, the third has nowhere to go.
    let mut pending = Vec::new();
    for _ in 0..3 {
        let url = server.url("/slow");
        pending.push(tokio::spawn(async move {
            reqwest::Client::new().get(url).send().await.unwrap()
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let mut statuses = Vec::new();
    let mut retry_after = None;
    for handle in pending {
        let response = handle.await.unwrap();
        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            retry_after = response.headers().get("retry-after").cloned();
        }
        statuses.push(response.status());
    }

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 2);
    assert_eq!(statuses[2], StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(retry_after.unwrap(), "1");
    assert_eq!(server.app_calls(), 2);

    server.stop().await;
}

#[tokio::test]
async fn test_graceful_stop() {
    let mut server = common::start_server(common::local_config()).await;
    let url = server.url("/slow");

    let in_flight = tokio::spawn(async move { reqwest::Client::new().get(url).send().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    server.server.stop().await.unwrap();
    assert_eq!(server.server.state(), ServerState::Stopped);

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(reqwest::get(server.url("/")).await.is_err());
}
