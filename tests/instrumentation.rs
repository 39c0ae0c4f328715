//! Router-level tests of the instrumentation middleware.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{middleware, Extension, Router};
use calculator_service::config::ServiceConfig;
use calculator_service::http::middleware::instrument;
use calculator_service::http::AppState;
use calculator_service::observability::metrics::{
    HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS,
};
use calculator_service::observability::{MetricsRegistry, TraceContext};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn instrumented(metrics: &MetricsRegistry) -> Router {
    let state = AppState::new(ServiceConfig::default(), metrics.clone());
    Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/boom",
            get(|Extension(ctx): Extension<TraceContext>| async move {
                if !ctx.trace_id().is_empty() {
                    panic!("handler exploded");
                }
                "unreachable"
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        )
        .layer(middleware::from_fn_with_state(state.clone(), instrument))
        .with_state(state)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

const BOOM: &[(&str, &str)] = &[("method", "GET"), ("endpoint", "/boom")];

#[tokio::test]
async fn test_panicking_handler_is_counted_once_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();
    let router = instrumented(&metrics);

    const N: u64 = 5;
    for _ in 0..N {
        let response = router.clone().oneshot(get_request("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let trace_id = response.headers()["x-trace-id"].to_str().unwrap().to_string();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal server error");
        assert_eq!(body["trace_id"], trace_id.as_str());
    }
    for _ in 0..3 {
        let response = router.clone().oneshot(get_request("/ok")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let snapshot = metrics.snapshot().unwrap();
    assert_eq!(
        snapshot.counter(
            HTTP_REQUESTS_TOTAL,
            &[("method", "GET"), ("endpoint", "/boom"), ("status", "500")]
        ),
        N
    );
    assert_eq!(snapshot.observation_count(HTTP_REQUEST_DURATION_SECONDS, BOOM), N);
    assert_eq!(snapshot.counter_total(HTTP_REQUESTS_TOTAL), N + 3);
}

#[tokio::test]
async fn test_concurrent_requests_are_each_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();
    let router = instrumented(&metrics);

    let mut handles = Vec::new();
    for i in 0..20 {
        let router = router.clone();
        let path = if i % 2 == 0 { "/ok" } else { "/boom" };
        handles.push(tokio::spawn(async move {
            router.oneshot(get_request(path)).await.unwrap().status()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = metrics.snapshot().unwrap();
    assert_eq!(snapshot.counter_total(HTTP_REQUESTS_TOTAL), 20);
    assert_eq!(snapshot.observation_count(HTTP_REQUEST_DURATION_SECONDS, BOOM), 10);
}

#[tokio::test]
async fn test_cancelled_request_is_recorded_as_failure() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();
    let router = instrumented(&metrics);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        router.oneshot(get_request("/slow")),
    )
    .await;
    assert!(result.is_err());

    let snapshot = metrics.snapshot().unwrap();
    assert_eq!(
        snapshot.counter(
            HTTP_REQUESTS_TOTAL,
            &[("method", "GET"), ("endpoint", "/slow"), ("status", "500")]
        ),
        1
    );
}

#[tokio::test]
async fn test_every_response_carries_trace_headers() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();
    let router = instrumented(&metrics);

    let request = Request::builder()
        .uri("/ok")
        .header("uber-trace-id", "a1b2c3d4e5f60718:00f067aa0ba902b7:0:1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-trace-id"], "a1b2c3d4e5f60718");
    assert_eq!(headers["x-parent-span-id"], "00f067aa0ba902b7");
    let span_id = headers["x-span-id"].to_str().unwrap();
    assert_eq!(
        headers["traceparent"],
        format!("00-0000000000000000a1b2c3d4e5f60718-{}-01", span_id).as_str()
    );
}
