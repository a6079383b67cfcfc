use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use forkline_core::RollbackSpec;
use forkline_types::api::{ApiResponse, RollbackRequest};
use forkline_types::models::{
    BatchDeleteResult, CleanupResult, DeleteMessageResult, ForwardResult, Message, MessageId,
    RollbackPoint, RollbackResult, SessionId,
};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Deserialize)]
pub struct PointsQuery {
    #[serde(default = "default_points")]
    pub limit: usize,
}

fn default_points() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub confirm: Option<String>,
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<DeleteMessageResult> {
    let result = blocking(&state, move |engine| {
        engine.delete_message(message_id, query.cascade)
    })
    .await?;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn batch_delete(
    State(state): State<AppState>,
    Query(query): Query<DeleteQuery>,
    Json(ids): Json<Vec<MessageId>>,
) -> ApiResult<BatchDeleteResult> {
    let result = blocking(&state, move |engine| {
        Ok(engine.batch_delete(&ids, query.cascade))
    })
    .await?;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn restore_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Message> {
    let message = blocking(&state, move |engine| engine.restore_message(message_id)).await?;
    Ok(Json(ApiResponse::ok(message)))
}

pub async fn rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<RollbackResult> {
    let spec = RollbackSpec {
        reason: req.reason,
        save_checkpoint: req.save_current_as_checkpoint.unwrap_or(false),
        checkpoint_name: req.checkpoint_name,
    };
    let result = blocking(&state, move |engine| {
        engine.rollback(req.session_id, req.target_message_id, spec)
    })
    .await?;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn rollback_points(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<PointsQuery>,
) -> ApiResult<Vec<RollbackPoint>> {
    let points = blocking(&state, move |engine| {
        engine.rollback_points(session_id, query.limit)
    })
    .await?;
    Ok(Json(ApiResponse::ok(points)))
}

pub async fn forward(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<ForwardResult> {
    let result = blocking(&state, move |engine| engine.forward(session_id)).await?;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn cleanup(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<CleanupResult> {
    let result = blocking(&state, move |engine| {
        engine.cleanup(session_id, query.confirm.as_deref())
    })
    .await?;
    Ok(Json(ApiResponse::ok(result)))
}
