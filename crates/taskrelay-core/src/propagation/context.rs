use opentelemetry::trace::{Span as _, SpanContext, SpanKind, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::SdkTracer;

use super::RequestId;

/// Module tag attached to log lines from the task pipeline.
pub const DEFAULT_MODULE: &str = "taskqueue";

/// Request-scoped context passed explicitly through the gateway and worker.
///
/// Holds the span this unit of work runs under. The span is started by the
/// SDK tracer as a child of the propagated parent (or as a new root), so its
/// ids and sampled flag come from the configured sampler. Clones share the
/// span; call [`RequestContext::end`] once the work is done.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    cx: Context,
    span: SpanContext,
}

impl RequestContext {
    /// Start `name` under `parent` (or a new trace if `parent` is invalid).
    pub fn start(
        tracer: &SdkTracer,
        name: &'static str,
        kind: SpanKind,
        parent: &SpanContext,
        request_id: RequestId,
    ) -> Self {
        let parent_cx = if parent.is_valid() {
            Context::new().with_remote_span_context(parent.clone())
        } else {
            Context::new()
        };
        let span = tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes([KeyValue::new("request_id", request_id.to_string())])
            .start_with_context(tracer, &parent_cx);
        let span_context = span.span_context().clone();
        Self {
            request_id,
            cx: parent_cx.with_span(span),
            span: span_context,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span
    }

    pub fn module(&self) -> &'static str {
        DEFAULT_MODULE
    }

    /// Empty when there is no valid span.
    pub fn trace_id(&self) -> String {
        if self.span.is_valid() {
            self.span.trace_id().to_string()
        } else {
            String::new()
        }
    }

    pub fn span_id(&self) -> String {
        if self.span.is_valid() {
            self.span.span_id().to_string()
        } else {
            String::new()
        }
    }

    pub fn sampled(&self) -> bool {
        self.span.is_sampled()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    /// End the span. Later calls are no-ops.
    pub fn end(&self) {
        self.cx.span().end();
    }
}
