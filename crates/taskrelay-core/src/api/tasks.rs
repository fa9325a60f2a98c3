use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;

use super::ApiState;
use crate::domain::{QueueName, TaskId};
use crate::gateway::{CreateTaskRequest, CreateTaskResponse, GatewayError};
use crate::propagation::RequestContext;

type ApiResult<T> = Result<T, GatewayError>;

pub(super) async fn create_default(
    State(state): State<ApiState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> ApiResult<Json<CreateTaskResponse>> {
    create(&state, &ctx, None, &body).await
}

pub(super) async fn create_in_queue(
    State(state): State<ApiState>,
    Extension(ctx): Extension<RequestContext>,
    Path(queue): Path<String>,
    body: Bytes,
) -> ApiResult<Json<CreateTaskResponse>> {
    let queue = parse_queue(queue)?;
    create(&state, &ctx, Some(queue), &body).await
}

pub(super) async fn delete_default(
    State(state): State<ApiState>,
    Extension(ctx): Extension<RequestContext>,
    Path(task_id): Path<String>,
) -> ApiResult<StatusCode> {
    let task_id = parse_task_id(task_id)?;
    state.gateway.delete_task(&ctx, None, task_id).await?;
    Ok(StatusCode::OK)
}

pub(super) async fn delete_in_queue(
    State(state): State<ApiState>,
    Extension(ctx): Extension<RequestContext>,
    Path((queue, task_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let queue = parse_queue(queue)?;
    let task_id = parse_task_id(task_id)?;
    state.gateway.delete_task(&ctx, Some(queue), task_id).await?;
    Ok(StatusCode::OK)
}

async fn create(
    state: &ApiState,
    ctx: &RequestContext,
    queue: Option<QueueName>,
    body: &[u8],
) -> ApiResult<Json<CreateTaskResponse>> {
    // 壊れた JSON も 400 の envelope で返したいので Json extractor は使わない
    let request: CreateTaskRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid request body: {e}")))?;

    let created = state.gateway.create_task(ctx, queue, request).await?;
    Ok(Json(created.into_response()))
}

fn parse_queue(raw: String) -> ApiResult<QueueName> {
    QueueName::parse(raw).map_err(|e| GatewayError::invalid_argument(e.to_string()))
}

fn parse_task_id(raw: String) -> ApiResult<TaskId> {
    TaskId::parse(raw).map_err(|e| GatewayError::invalid_argument(e.to_string()))
}
