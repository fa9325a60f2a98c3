//! HTTP request metrics and the Prometheus `/metrics` endpoint.
//!
//! - `http_requests_total{method, path, status_code}`: counter
//! - `http_request_duration_seconds{method, path, status_code}`: histogram
//!
//! `path` is the matched route template (`/tasks/{name}`), so task ids never
//! become label values.

use std::sync::OnceLock;
use std::time::Duration;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::RelayError;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const METRICS_PATH: &str = "/metrics";

const UNMATCHED_PATH: &str = "unmatched";

const DURATION_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static PROMETHEUS: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the process-wide Prometheus recorder.
///
/// Only the first call installs; later calls return the same handle (or the
/// same error).
pub fn init_metrics() -> Result<PrometheusHandle, RelayError> {
    PROMETHEUS
        .get_or_init(|| install().map_err(|e| e.to_string()))
        .clone()
        .map_err(RelayError::Metrics)
}

fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION.to_string()),
            &DURATION_BUCKETS,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, Unit::Count, "Total number of HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION,
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    tracing::info!(event = "metrics.init", "prometheus recorder installed");
    Ok(handle)
}

pub(super) fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_PATH.to_string(), |path| path.as_str().to_string())
}

pub(super) fn record_http_request(method: &str, path: &str, status: StatusCode, elapsed: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status_code", status.as_u16().to_string()),
    ];
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUEST_DURATION, &labels).record(elapsed.as_secs_f64());
}

/// `GET /metrics`: Prometheus text format, 503 until [`init_metrics`] ran.
pub(super) async fn serve_metrics() -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; version=0.0.4; charset=utf-8")];
    match PROMETHEUS.get() {
        Some(Ok(handle)) => (StatusCode::OK, content_type, handle.render()),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "metrics recorder not installed".to_string(),
        ),
    }
}
