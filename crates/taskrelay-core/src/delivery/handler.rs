//! `http:forward` handler: replays a stored request against the target.
//!
//! One attempt runs through fixed stages; each stage either hands over to the
//! next or ends the attempt with an outcome:
//!
//! decode payload -> build request -> dispatch -> classify response
//!
//! Decode and build failures are permanent (the stored task can never
//! succeed). Dispatch failures are retryable. The response status decides
//! the rest (see [`classify_status`]).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use opentelemetry_sdk::trace::SdkTracer;
use tracing::Instrument;

use super::classify::classify_status;
use super::runtime::TaskHandler;
use super::DeliveryContext;
use crate::domain::{Artifact, DeliveryOutcome, HandlerError, OutcomeKind, TaskEnvelope, TaskType};
use crate::error::RelayError;
use crate::payload::TaskPayload;
use crate::propagation::{self, REQUEST_ID_HEADER, RequestContext, RequestId};

/// Response bodies are kept up to this many bytes for diagnostics.
pub const MAX_CAPTURED_BODY: usize = 4096;

/// Payload headers that name the originating event type, in priority order.
pub const JOB_NAME_HEADERS: [&str; 2] = ["ce-type", "x-event-type"];

pub struct HttpForwardHandler {
    target: String,
    client: reqwest::Client,
    tracer: SdkTracer,
}

impl HttpForwardHandler {
    /// `timeout` bounds the whole exchange (connect, send, read body).
    pub fn new(
        target: impl Into<String>,
        timeout: Duration,
        tracer: SdkTracer,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::HttpClient)?;
        Ok(Self {
            target: target.into(),
            client,
            tracer,
        })
    }

    /// Run one delivery attempt and report what happened.
    pub async fn deliver(&self, ctx: &DeliveryContext, envelope: &TaskEnvelope) -> DeliveryOutcome {
        let payload = match TaskPayload::decode(envelope.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    event = "job.decode.fail",
                    task_id = %envelope.task_id(),
                    queue = %envelope.queue(),
                    error = %e,
                    "dropping task with undecodable payload"
                );
                return DeliveryOutcome::permanent(e.to_string());
            }
        };

        // 元リクエストの trace / request id を復元する
        let request_id = RequestId::from_incoming(payload.header(REQUEST_ID_HEADER));
        let parent = propagation::extract_map(payload.headers());
        let rctx = RequestContext::start(&self.tracer, "job", SpanKind::Consumer, &parent, request_id);
        let job_name = job_name(&payload, envelope.task_type());
        rctx.set_attribute(KeyValue::new("job.name", job_name.clone()));
        rctx.set_attribute(KeyValue::new("task_type", envelope.task_type().to_string()));

        let span = tracing::info_span!(
            "job",
            job.name = %job_name,
            job.id = %envelope.task_id(),
            task_type = %envelope.task_type(),
            queue = %envelope.queue(),
            request_id = %rctx.request_id(),
            trace_id = %rctx.trace_id(),
            span_id = %rctx.span_id(),
            trace_sampled = rctx.sampled(),
            module = rctx.module(),
        );

        async {
            tracing::info!(
                event = "job.start",
                retried = envelope.retried(),
                max_retry = envelope.max_retry(),
                "job started"
            );
            let started = Instant::now();
            let outcome = self.attempt(ctx, &payload, &rctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome.kind {
                OutcomeKind::Success => tracing::info!(
                    event = "job.finish",
                    outcome = "success",
                    status = outcome.status_code(),
                    elapsed_ms,
                    "job finished"
                ),
                OutcomeKind::PermanentFailure => tracing::warn!(
                    event = "job.finish",
                    outcome = "permanent_failure",
                    status = outcome.status_code(),
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    response_body = outcome.response_body().unwrap_or_default(),
                    elapsed_ms,
                    "job failed, not retrying"
                ),
                OutcomeKind::RetryableFailure => tracing::warn!(
                    event = "job.finish",
                    outcome = "retryable_failure",
                    status = outcome.status_code(),
                    reason = outcome.reason.as_deref().unwrap_or_default(),
                    elapsed_ms,
                    "job failed, will retry"
                ),
            }
            if let Some(status) = outcome.status_code() {
                rctx.set_attribute(KeyValue::new("http.response.status_code", i64::from(status)));
            }
            rctx.end();
            outcome
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        ctx: &DeliveryContext,
        payload: &TaskPayload,
        rctx: &RequestContext,
    ) -> DeliveryOutcome {
        let request = match self.build_request(payload, rctx) {
            Ok(request) => request,
            Err(reason) => return DeliveryOutcome::permanent(reason),
        };

        let response = tokio::select! {
            response = self.client.execute(request) => response,
            _ = ctx.cancelled() => return DeliveryOutcome::permanent("delivery cancelled"),
        };

        match response {
            Ok(response) => read_outcome(response).await,
            Err(e) if e.is_timeout() => DeliveryOutcome::retryable(format!("request timed out: {e}")),
            Err(e) => DeliveryOutcome::retryable(format!("request failed: {e}")),
        }
    }

    /// Payload headers are copied first; trace context and request id are
    /// applied on top so they always describe this attempt.
    fn build_request(
        &self,
        payload: &TaskPayload,
        rctx: &RequestContext,
    ) -> Result<reqwest::Request, String> {
        let url = reqwest::Url::parse(&self.target)
            .map_err(|e| format!("invalid target endpoint {:?}: {e}", self.target))?;

        let mut headers = HeaderMap::with_capacity(payload.headers().len() + 3);
        for (name, value) in payload.headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("invalid header name {name:?}: {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| format!("invalid value for header {name:?}: {e}"))?;
            headers.insert(header_name, header_value);
        }
        propagation::inject_http(rctx.span_context(), &mut headers);
        let request_id = HeaderValue::from_str(rctx.request_id().as_str())
            .map_err(|e| format!("invalid request id: {e}"))?;
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);

        self.client
            .post(url)
            .headers(headers)
            .body(payload.body().to_vec())
            .build()
            .map_err(|e| format!("failed to build request: {e}"))
    }
}

#[async_trait]
impl TaskHandler for HttpForwardHandler {
    async fn handle(&self, ctx: &DeliveryContext, envelope: &TaskEnvelope) -> Result<(), HandlerError> {
        self.deliver(ctx, envelope).await.into_result()
    }
}

async fn read_outcome(mut response: reqwest::Response) -> DeliveryOutcome {
    let status = response.status().as_u16();
    let outcome = match classify_status(status) {
        OutcomeKind::Success => return DeliveryOutcome::success().with_artifact(Artifact::StatusCode(status)),
        OutcomeKind::PermanentFailure => {
            DeliveryOutcome::permanent(format!("target returned non-retryable status {status}"))
        }
        OutcomeKind::RetryableFailure => {
            DeliveryOutcome::retryable(format!("target returned status {status}"))
        }
    };

    let mut captured = Vec::new();
    while captured.len() < MAX_CAPTURED_BODY {
        match response.chunk().await {
            Ok(Some(chunk)) => captured.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    captured.truncate(MAX_CAPTURED_BODY);

    outcome
        .with_artifact(Artifact::StatusCode(status))
        .with_artifact(Artifact::ResponseBody(
            String::from_utf8_lossy(&captured).into_owned(),
        ))
}

fn job_name(payload: &TaskPayload, task_type: &TaskType) -> String {
    JOB_NAME_HEADERS
        .iter()
        .find_map(|name| payload.header(name))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| task_type.to_string())
}
