//! Request handlers.
//!
//! Handlers are thin: resolve an operation, hand it to the executor or the task manager,
//! and let `GatewayError` render failures.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::downstream::{GatewayError, GatewayResult};
use crate::http::request::RequestContext;
use crate::http::response::status_for;
use crate::http::server::AppState;
use crate::resilience::ExecutorStats;
use crate::tasks::{PollStatus, Submission, TaskPayload, TaskView};

/// Body of `POST /v1/operations/{name}`.
#[derive(Debug, Default, Deserialize)]
pub struct OperationCall {
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusSummary {
    pub async_enabled: bool,
    pub queue_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub downstream: ExecutorStats,
    pub tasks: TaskStatusSummary,
    pub operations: Vec<String>,
}

async fn run_operation(
    state: &AppState,
    ctx: &RequestContext,
    name: &str,
    params: HashMap<String, String>,
    body: Option<Value>,
) -> GatewayResult<Json<Value>> {
    let request = state
        .operations
        .build_request(name, &params, body, ctx.credential())?;

    tracing::debug!(request_id = %ctx.request_id, operation = %name, path = %request.path, "Executing operation");
    let value = state.executor.execute(&request, Some(ctx.deadline)).await?;
    Ok(Json(value))
}

fn param(name: &str, value: String) -> HashMap<String, String> {
    HashMap::from([(name.to_string(), value)])
}

pub async fn list_devices(State(state): State<AppState>, ctx: RequestContext) -> GatewayResult<Json<Value>> {
    run_operation(&state, &ctx, "get_devices", HashMap::new(), None).await
}

pub async fn get_device(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(device_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    run_operation(&state, &ctx, "get_device", param("device_id", device_id), None).await
}

pub async fn list_tickets(State(state): State<AppState>, ctx: RequestContext) -> GatewayResult<Json<Value>> {
    run_operation(&state, &ctx, "get_tickets", HashMap::new(), None).await
}

pub async fn list_incidents(State(state): State<AppState>, ctx: RequestContext) -> GatewayResult<Json<Value>> {
    run_operation(&state, &ctx, "get_incidents", HashMap::new(), None).await
}

/// Invoke any registered operation by name.
pub async fn invoke_operation(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(name): Path<String>,
    call: Result<Json<OperationCall>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let Json(call) = call.map_err(|e| GatewayError::invalid_params(e.body_text()))?;
    run_operation(&state, &ctx, &name, call.params, call.body).await
}

/// Submit a device command as a background task.
///
/// Returns 202 with the task id, or the final outcome directly when async tasks are disabled.
pub async fn submit_command(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(device_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> GatewayResult<Response> {
    let Json(body) = body.map_err(|e| GatewayError::invalid_params(e.body_text()))?;
    let payload = TaskPayload {
        operation: "send_command".to_string(),
        params: param("device_id", device_id),
        body: Some(body),
    };

    let submission = state
        .tasks
        .submit(payload, ctx.credential(), Some(ctx.deadline))
        .await?;

    Ok(match submission {
        Submission::Queued { task_id } => (
            StatusCode::ACCEPTED,
            Json(json!({ "task_id": task_id, "status": PollStatus::Queued })),
        )
            .into_response(),
        Submission::Completed(view) => view_response(view),
    })
}

fn view_response(view: TaskView) -> Response {
    let status = match &view.error {
        Some(error) if view.status == PollStatus::Error => status_for(error.kind),
        _ => StatusCode::OK,
    };
    (status, Json(view)).into_response()
}

pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> GatewayResult<Json<TaskView>> {
    Ok(Json(state.tasks.status(&task_id).await?))
}

pub async fn admin_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        downstream: state.executor.stats(),
        tasks: TaskStatusSummary {
            async_enabled: state.tasks.async_enabled(),
            queue_depth: state.tasks.queue_depth(),
        },
        operations: state.operations.names().into_iter().map(str::to_string).collect(),
    })
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
