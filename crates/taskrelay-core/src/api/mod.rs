//! HTTP surface.
//!
//! | Method | Path                      | Handler                          |
//! |--------|---------------------------|----------------------------------|
//! | POST   | `/tasks`                  | create in the default queue      |
//! | POST   | `/tasks/{queue}`          | create in the named queue        |
//! | DELETE | `/tasks/{task_id}`        | delete from the default queue    |
//! | DELETE | `/tasks/{queue}/{task_id}`| delete from the named queue      |
//! | GET    | `/health`, `/health/ready`| readiness (pings the broker)     |
//! | GET    | `/health/live`            | liveness                         |
//! | GET    | `/metrics`                | Prometheus scrape                |
//! | POST   | `/grpc.health.v1.Health/Check` | gRPC health `Check` (Connect, JSON) |

mod context;
mod error;
mod health;
mod request_metrics;
mod tasks;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use opentelemetry_sdk::trace::SdkTracer;
use tower_http::catch_panic::CatchPanicLayer;

pub use context::{context_middleware, is_health_path};
pub use error::{ErrorBody, ErrorEnvelope};
pub use health::{
    BrokerCheck, GRPC_HEALTH_CHECK_PATH, GrpcHealthRequest, GrpcHealthResponse, HealthChecks,
    HealthResponse, ServingStatus,
};
pub use request_metrics::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL, METRICS_PATH, init_metrics};

use crate::gateway::TaskGateway;
use crate::ports::Broker;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<TaskGateway>,
    /// Pinged by the readiness check.
    pub broker: Arc<dyn Broker>,
    /// Starts the server span of every request.
    pub tracer: SdkTracer,
    pub version: &'static str,
}

impl ApiState {
    pub fn new(gateway: Arc<TaskGateway>, broker: Arc<dyn Broker>, tracer: SdkTracer) -> Self {
        Self {
            gateway,
            broker,
            tracer,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Build the router. Axum matches `{name}` for both the POST (queue) and the
/// DELETE (task id) form of `/tasks/{name}`.
pub fn router(state: ApiState) -> Router {
    let routes = Router::new()
        .route("/tasks", post(tasks::create_default))
        .route(
            "/tasks/{name}",
            post(tasks::create_in_queue).delete(tasks::delete_default),
        )
        .route("/tasks/{queue}/{task_id}", delete(tasks::delete_in_queue))
        .route("/health", get(health::ready))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route(GRPC_HEALTH_CHECK_PATH, post(health::grpc_check))
        .route(METRICS_PATH, get(request_metrics::serve_metrics));
    with_layers(routes, &state.tracer).with_state(state)
}

/// The panic catcher sits inside the context middleware, so a panic still
/// answers with the request id and shows up in the access log and metrics.
fn with_layers<S>(routes: Router<S>, tracer: &SdkTracer) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    routes
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(middleware::from_fn_with_state(
            tracer.clone(),
            context_middleware,
        ))
}
