//! Per-request context: request id, server span, access log, metrics.

use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use opentelemetry_sdk::trace::SdkTracer;
use tracing::Instrument;

use super::health::GRPC_HEALTH_CHECK_PATH;
use super::request_metrics::{self, METRICS_PATH};
use crate::propagation::{self, REQUEST_ID_HEADER, RequestContext, RequestId};

/// Health checks are not access-logged.
pub fn is_health_path(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/") || path == GRPC_HEALTH_CHECK_PATH
}

/// Health checks and scrapes: no access log line, no request metrics.
fn is_observed(path: &str) -> bool {
    !is_health_path(path) && path != METRICS_PATH
}

/// Middleware that attaches a [`RequestContext`] to the request and echoes
/// the request id on the response.
///
/// An incoming `x-request-id` is kept only if it is a UUIDv7; otherwise a
/// fresh one is minted. The server span is started by `tracer` as a child of
/// the incoming `traceparent`, and ended once the response is ready.
pub async fn context_middleware(
    State(tracer): State<SdkTracer>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let incoming = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let request_id = RequestId::from_incoming(incoming);
    let parent = propagation::extract_http(req.headers());
    let ctx = RequestContext::start(&tracer, "http.request", SpanKind::Server, &parent, request_id);

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = request_metrics::route_label(&req);
    ctx.set_attribute(KeyValue::new("http.request.method", method.to_string()));
    ctx.set_attribute(KeyValue::new("http.route", route.clone()));

    let span = tracing::info_span!(
        "http.request",
        method = %method,
        path = %path,
        request_id = %ctx.request_id(),
        trace_id = %ctx.trace_id(),
        span_id = %ctx.span_id(),
        trace_sampled = ctx.sampled(),
        module = ctx.module(),
    );

    req.extensions_mut().insert(ctx.clone());

    let started = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let elapsed = started.elapsed();

    if let Ok(value) = HeaderValue::from_str(ctx.request_id().as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let status = response.status();
    ctx.set_attribute(KeyValue::new(
        "http.response.status_code",
        i64::from(status.as_u16()),
    ));
    ctx.end();

    if is_observed(&path) {
        request_metrics::record_http_request(method.as_str(), &route, status, elapsed);
        let _entered = span.enter();
        tracing::info!(
            event = "http.request.finish",
            status = status.as_u16(),
            latency_ms = elapsed.as_millis() as u64,
            "request finished"
        );
    }
    response
}
