//! End-to-end HTTP surface tests against an in-memory-backed
//! `AppContext`, covering a basic push-and-dispatch scenario and
//! exercising queue/routing CRUD through the router directly rather
//! than a bound socket. Grounded on `cyclotron-janitor`'s `tokio::test`
//! + in-memory-driver convention for tests that would otherwise need a
//! live Postgres instance.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use fireworq_server::app_context::AppContext;
use fireworq_server::config::Config;
use fireworq_server::http::app;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        bind: "127.0.0.1:0".to_string(),
        shutdown_timeout: 5,
        config_refresh_interval: 20,
        driver: "in-memory".to_string(),
        database_url: String::new(),
        pg_max_connections: 1,
        pg_min_connections: 1,
        queue_default: String::new(),
        queue_default_polling_interval: 50,
        queue_default_max_workers: 5,
        dispatch_user_agent: String::new(),
        dispatch_keep_alive: false,
        dispatch_max_conns_per_host: 10,
        dispatch_idle_conn_timeout: 0,
        activator_lock_wait_timeout: 10,
        activator_tick_interval: 1000,
        pid: String::new(),
        access_log: String::new(),
        error_log: String::new(),
        metrics_enabled: false,
    }
}

async fn send(router: axum::Router, method: Method, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn queue_and_routing_crud_then_push_dispatches_a_job() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    let (status, body) = send(
        router.clone(),
        Method::PUT,
        "/queue/q1",
        r#"{"max_workers":1,"polling_interval":10}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "q1");
    assert_eq!(body["max_workers"], 1);

    let (status, body) = send(router.clone(), Method::GET, "/queues", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(router.clone(), Method::PUT, "/routing/cat1", r#"{"queue_name":"q1"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue_name"], "q1");

    let (status, body) =
        send(router.clone(), Method::POST, "/job/cat1", r#"{"url":"http://worker.invalid/","payload":{"n":1}}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].as_i64().is_some());
    assert_eq!(body["queue_name"], "q1");

    let (status, _) = send(router.clone(), Method::GET, "/queue/q1/stats", "").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(router.clone(), Method::DELETE, "/queue/q1", "").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(router.clone(), Method::DELETE, "/queue/q1", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn push_without_a_routing_is_a_bad_request_shaped_not_found() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    let (status, _) = send(
        router.clone(),
        Method::POST,
        "/job/unrouted",
        r#"{"url":"http://worker.invalid/","payload":null}"#,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn push_missing_url_is_a_bad_request() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    let (status, _) = send(router.clone(), Method::POST, "/job/cat1", r#"{"url":"","payload":null}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn push_with_no_payload_key_defaults_to_an_empty_payload() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    send(router.clone(), Method::PUT, "/queue/q1", r#"{"max_workers":1,"polling_interval":10}"#).await;
    send(router.clone(), Method::PUT, "/routing/cat1", r#"{"queue_name":"q1"}"#).await;

    let (status, body) = send(router.clone(), Method::POST, "/job/cat1", r#"{"url":"http://worker.invalid/"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].as_i64().is_some());
}

#[tokio::test]
async fn version_and_settings_endpoints() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    let (status, _) = send(router.clone(), Method::GET, "/version", "").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(router.clone(), Method::GET, "/settings", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["driver"], "in-memory");
}

#[tokio::test]
async fn unknown_queue_routes_404() {
    let context = AppContext::new(&test_config(), "test".to_string()).await.unwrap();
    let router = app(context);

    let (status, _) = send(router.clone(), Method::GET, "/queue/missing/stats", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(router.clone(), Method::GET, "/queue/missing/node", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
