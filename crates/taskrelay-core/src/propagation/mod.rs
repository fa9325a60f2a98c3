//! Trace and request-identity propagation.
//!
//! Trace context moves across three hops: the inbound HTTP request, the
//! payload header map stored in the broker, and the outbound HTTP request
//! made by the worker. The standard form is W3C `traceparent` /
//! `tracestate`; the map form additionally understands the `googclient_*`
//! keys (see [`fallback`]).
//!
//! Nothing here touches global state: the propagator is a plain value and the
//! span context is passed around inside [`RequestContext`].

pub mod carrier;
mod context;
pub mod fallback;
mod request_id;

use std::collections::BTreeMap;

use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry_sdk::propagation::TraceContextPropagator;

pub use context::{DEFAULT_MODULE, RequestContext};
pub use request_id::{REQUEST_ID_HEADER, RequestId};

use carrier::{HeaderExtractor, HeaderInjector, MapExtractor, MapInjector};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Write `span` as W3C headers on an HTTP request. No-op for invalid spans.
pub fn inject_http(span: &SpanContext, headers: &mut HeaderMap) {
    inject(span, &mut HeaderInjector(headers));
}

/// Write `span` as W3C entries into a payload header map.
pub fn inject_map(span: &SpanContext, map: &mut BTreeMap<String, String>) {
    inject(span, &mut MapInjector(map));
}

/// Read a remote parent from HTTP headers; invalid context if absent.
pub fn extract_http(headers: &HeaderMap) -> SpanContext {
    extract(&HeaderExtractor(headers))
}

/// Read a remote parent from a payload header map.
///
/// The `googclient_*` keys win when they form a valid context; otherwise the
/// standard W3C keys are used.
pub fn extract_map(map: &BTreeMap<String, String>) -> SpanContext {
    let carrier = MapExtractor(map);
    fallback::extract(&carrier).unwrap_or_else(|| extract(&carrier))
}

fn inject(span: &SpanContext, injector: &mut dyn Injector) {
    if !span.is_valid() {
        return;
    }
    let cx = Context::new().with_remote_span_context(span.clone());
    TraceContextPropagator::new().inject_context(&cx, injector);
}

fn extract(extractor: &dyn Extractor) -> SpanContext {
    let cx = TraceContextPropagator::new().extract(extractor);
    let span = cx.span().span_context().clone();
    if span.is_valid() {
        span
    } else {
        SpanContext::empty_context()
    }
}
