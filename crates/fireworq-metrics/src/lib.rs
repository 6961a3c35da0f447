//! Prometheus export and HTTP middleware, grounded on
//! `common/serve_metrics/src/lib.rs`. The Go daemon never exposed
//! Prometheus metrics; this carries the same observability layer
//! regardless, independent of which dispatch features are in scope.

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse, routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Adds `/metrics` and the request-timing middleware to `router`.
/// Should be the last thing applied before serving.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router
        .route("/metrics", get(move || std::future::ready(recorder_handle.render())))
        .layer(axum::middleware::from_fn(track_metrics))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0];

    PrometheusBuilder::new().set_buckets(BUCKETS).unwrap().install_recorder().unwrap()
}

/// Records request count and latency, labeled by method/path/status.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let labels = [("method", method.to_string()), ("path", path), ("status", status)];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
