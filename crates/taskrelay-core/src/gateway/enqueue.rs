use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};

use super::{CreateTaskRequest, CreateTaskResponse, GatewayError, TaskGateway};
use crate::domain::{BrokerErrorKind, QueueName, TaskId, TaskType};
use crate::payload::TaskPayload;
use crate::ports::EnqueueOptions;
use crate::propagation::{self, REQUEST_ID_HEADER, RequestContext};

const ENQUEUE_FAILED: &str = "failed to enqueue task";

/// Result of a successful `create_task`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTask {
    pub task_id: TaskId,
    pub queue: QueueName,
    /// Caller's name when given, otherwise `tasks/<broker id>`.
    pub name: String,
    pub create_time: DateTime<Utc>,
    /// The caller's `scheduleTime`, echoed verbatim.
    pub schedule_time: Option<String>,
}

impl CreatedTask {
    pub fn into_response(self) -> CreateTaskResponse {
        CreateTaskResponse {
            name: self.name,
            create_time: self.create_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            schedule_time: self.schedule_time,
        }
    }
}

impl TaskGateway {
    pub async fn create_task(
        &self,
        ctx: &RequestContext,
        queue: Option<QueueName>,
        request: CreateTaskRequest,
    ) -> Result<CreatedTask, GatewayError> {
        self.validator
            .validate(&request)
            .map_err(|e| GatewayError::invalid_argument(e.to_string()))?;

        let queue = queue.unwrap_or_else(|| self.config.default_queue.clone());
        let task = request.task;
        let http_request = task.http_request.unwrap_or_default();

        let body = STANDARD
            .decode(http_request.body.as_bytes())
            .map_err(|e| GatewayError::invalid_argument(format!("invalid base64 body: {e}")))?;

        let schedule_time = task.schedule_time.filter(|raw| !raw.is_empty());
        let schedule_at = schedule_time
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| GatewayError::invalid_argument(format!("invalid scheduleTime: {e}")))
            })
            .transpose()?;

        let now = self.clock.now();
        let headers = self.payload_headers(ctx, http_request.headers.unwrap_or_default());
        let payload = TaskPayload::new(body, headers, now).encode().map_err(|e| {
            tracing::error!(
                event = "task.enqueue.fail",
                error = %e,
                queue = %queue,
                request_id = %ctx.request_id(),
                "failed to encode task payload"
            );
            GatewayError::internal(ENQUEUE_FAILED)
        })?;

        let requested_id = if task.name.is_empty() {
            None
        } else {
            Some(TaskId::parse(task.name).map_err(|e| GatewayError::invalid_argument(e.to_string()))?)
        };

        let mut opts = EnqueueOptions::new(queue.clone(), self.config.max_retry);
        if let Some(id) = requested_id.clone() {
            opts = opts.with_id(id);
        }
        // 過去または現在の scheduleTime は即時配送
        if let Some(at) = schedule_at.filter(|at| *at > now) {
            opts = opts.with_not_before(at);
        }

        let info = match self.broker.enqueue(&TaskType::http_forward(), payload, opts).await {
            Ok(info) => info,
            Err(e) if e.kind() == BrokerErrorKind::IdConflict => {
                let task_id = requested_id.map(|id| id.to_string()).unwrap_or_default();
                return Err(GatewayError::AlreadyExists { task_id });
            }
            Err(e) => {
                tracing::error!(
                    event = "task.enqueue.fail",
                    error = %e,
                    queue = %queue,
                    request_id = %ctx.request_id(),
                    module = ctx.module(),
                    "failed to enqueue task"
                );
                return Err(GatewayError::internal(ENQUEUE_FAILED));
            }
        };

        tracing::debug!(
            event = "task.enqueue",
            queue = %info.queue,
            task_id = %info.id,
            state = %info.state,
            request_id = %ctx.request_id(),
            trace_id = %ctx.trace_id(),
            "task enqueued"
        );

        let name = match &requested_id {
            Some(id) => id.to_string(),
            None => format!("tasks/{}", info.id),
        };
        Ok(CreatedTask {
            task_id: info.id,
            queue: info.queue,
            name,
            create_time: now,
            schedule_time,
        })
    }

    /// Caller headers plus trace context and request id; ours win on clashes.
    fn payload_headers(
        &self,
        ctx: &RequestContext,
        mut headers: BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        propagation::inject_map(ctx.span_context(), &mut headers);
        headers.retain(|k, _| !k.eq_ignore_ascii_case(REQUEST_ID_HEADER));
        headers.insert(REQUEST_ID_HEADER.to_string(), ctx.request_id().to_string());
        headers
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use opentelemetry::trace::{SpanContext, SpanId, SpanKind, TraceFlags, TraceId, TraceState};

    use super::*;
    use crate::domain::TaskState;
    use crate::gateway::{GatewayConfig, HttpRequestSpec, TaskSpec};
    use crate::ports::{Broker, Clock, DeliverySource, FixedClock, UlidGenerator};
    use crate::propagation::{RequestId, TRACEPARENT_HEADER};
    use crate::queue::{InMemoryBroker, InMemoryBrokerConfig};
    use crate::telemetry::{self, TracingConfig};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (TaskGateway, InMemoryBroker) {
        setup_with(GatewayConfig::default())
    }

    fn setup_with(config: GatewayConfig) -> (TaskGateway, InMemoryBroker) {
        // broker and gateway must agree on "now" for scheduling decisions
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(now()));
        let broker = InMemoryBroker::new(
            InMemoryBrokerConfig::default(),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        );
        let gateway = TaskGateway::new(Arc::new(broker.clone()), clock, config);
        (gateway, broker)
    }

    fn ctx() -> RequestContext {
        let parent = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let provider = TracingConfig::default().build_provider();
        RequestContext::start(
            &telemetry::tracer(&provider),
            "http.request",
            SpanKind::Server,
            &parent,
            RequestId::generate(),
        )
    }

    fn request(name: &str, body: &str, schedule_time: Option<&str>) -> CreateTaskRequest {
        let mut headers = BTreeMap::new();
        headers.insert("X-Test".to_string(), "1".to_string());
        headers.insert("X-Request-Id".to_string(), "spoofed".to_string());
        CreateTaskRequest {
            task: TaskSpec {
                name: name.to_string(),
                http_request: Some(HttpRequestSpec {
                    body: body.to_string(),
                    headers: Some(headers),
                }),
                schedule_time: schedule_time.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn assigns_name_and_stores_payload() {
        let (gateway, broker) = setup();
        let ctx = ctx();

        let created = gateway
            .create_task(&ctx, None, request("", "aGVsbG8=", None))
            .await
            .unwrap();

        assert_eq!(created.name, format!("tasks/{}", created.task_id));
        assert_eq!(created.queue.as_str(), "default");
        let resp = created.into_response();
        assert_eq!(resp.create_time, "2025-06-01T12:00:00Z");
        assert!(resp.schedule_time.is_none());

        let lease = broker.lease(&[QueueName::default()]).await.unwrap();
        assert_eq!(lease.envelope().task_type().as_str(), TaskType::HTTP_FORWARD);
        assert_eq!(lease.envelope().max_retry(), 3);

        let payload = TaskPayload::decode(lease.envelope().payload()).unwrap();
        assert_eq!(payload.body(), b"hello");
        assert_eq!(payload.created_at(), now());
        assert_eq!(payload.header("x-test"), Some("1"));
        assert_eq!(payload.header(REQUEST_ID_HEADER), Some(ctx.request_id().as_str()));
        assert!(!payload.headers().contains_key("X-Request-Id"));

        let traceparent = payload.header(TRACEPARENT_HEADER).unwrap();
        assert!(traceparent.contains("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert!(traceparent.contains(&ctx.span_id()));
    }

    #[tokio::test]
    async fn caller_name_is_the_task_id_and_conflicts() {
        let (gateway, _broker) = setup();

        let created = gateway
            .create_task(&ctx(), None, request("order-1", "", None))
            .await
            .unwrap();
        assert_eq!(created.name, "order-1");
        assert_eq!(created.task_id.as_str(), "order-1");

        let err = gateway
            .create_task(&ctx(), None, request("order-1", "", None))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::AlreadyExists {
                task_id: "order-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn future_schedule_is_delayed_and_echoed() {
        let (gateway, broker) = setup();
        let raw = "2025-06-01T13:00:00+01:00";

        let created = gateway
            .create_task(&ctx(), None, request("later", "", Some("2025-06-01T12:30:00Z")))
            .await
            .unwrap();
        assert_eq!(created.schedule_time.as_deref(), Some("2025-06-01T12:30:00Z"));

        // same instant as `now`: not in the future, delivered immediately
        let created_now = gateway
            .create_task(&ctx(), None, request("now", "", Some(raw)))
            .await
            .unwrap();
        assert_eq!(created_now.schedule_time.as_deref(), Some(raw));

        let q = QueueName::default();
        let later = TaskId::parse("later").unwrap();
        let immediate = TaskId::parse("now").unwrap();
        assert_eq!(broker.get_state(&q, &later).await.unwrap(), TaskState::Scheduled);
        assert_eq!(broker.get_state(&q, &immediate).await.unwrap(), TaskState::Pending);
    }

    #[tokio::test]
    async fn past_schedule_is_delivered_immediately_but_echoed() {
        let (gateway, broker) = setup();
        let raw = "2025-06-01T11:59:59Z";

        let created = gateway
            .create_task(&ctx(), None, request("overdue", "", Some(raw)))
            .await
            .unwrap();
        assert_eq!(created.into_response().schedule_time.as_deref(), Some(raw));

        let q = QueueName::default();
        let id = TaskId::parse("overdue").unwrap();
        assert_eq!(broker.get_state(&q, &id).await.unwrap(), TaskState::Pending);
        assert_eq!(broker.counts(&q).await.scheduled, 0);
        assert!(broker.lease(&[q]).await.is_some());
    }

    #[tokio::test]
    async fn name_limit_comes_from_config() {
        let (gateway, _broker) = setup_with(GatewayConfig {
            max_name_len: 4,
            ..GatewayConfig::default()
        });

        gateway
            .create_task(&ctx(), None, request("abcd", "", None))
            .await
            .unwrap();
        let err = gateway
            .create_task(&ctx(), None, request("abcde", "", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(ref m) if m.starts_with("task.name")));
    }

    #[tokio::test]
    async fn named_queue_is_used() {
        let (gateway, broker) = setup();
        let queue = QueueName::parse("emails").unwrap();

        let created = gateway
            .create_task(&ctx(), Some(queue.clone()), request("", "", None))
            .await
            .unwrap();

        assert_eq!(created.queue, queue);
        assert_eq!(broker.counts(&queue).await.pending, 1);
        assert_eq!(broker.counts(&QueueName::default()).await.pending, 0);
    }

    #[tokio::test]
    async fn bad_input_is_invalid_argument() {
        let (gateway, broker) = setup();

        let err = gateway
            .create_task(&ctx(), None, request("", "%%%not-base64", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(ref m) if m.starts_with("invalid base64 body")));

        let err = gateway
            .create_task(&ctx(), None, request("", "", Some("tomorrow")))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(ref m) if m.starts_with("invalid scheduleTime")));

        let missing = CreateTaskRequest {
            task: TaskSpec::default(),
        };
        let err = gateway.create_task(&ctx(), None, missing).await.unwrap_err();
        assert_eq!(err.http_code(), 400);

        assert_eq!(broker.counts(&QueueName::default()).await.outstanding(), 0);
    }

    #[tokio::test]
    async fn broker_failure_is_opaque_internal() {
        let (gateway, broker) = setup();
        broker.close().await;

        let err = gateway
            .create_task(&ctx(), None, request("", "", None))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Internal(ENQUEUE_FAILED.to_string()));
    }
}
