use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use forkline_core::{NewSession, SendMessage};
use forkline_types::api::{ApiResponse, CreateSessionRequest, SendMessageRequest};
use forkline_types::models::{BranchId, Message, Session, SessionDetail, SessionId};

use crate::error::ApiError;
use crate::middleware::Actor;
use crate::state::{AppState, blocking};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub branch_id: Option<BranchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForestQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(Actor(user_id)): Extension<Actor>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<Session> {
    let session = blocking(&state, move |engine| {
        engine.create_session(NewSession {
            user_id,
            title: req.title,
            description: req.description,
            model_name: req.model_name,
            model_config: req.model_config,
        })
    })
    .await?;
    Ok(Json(ApiResponse::ok(session)))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(Actor(user_id)): Extension<Actor>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Vec<Session>> {
    let sessions = blocking(&state, move |engine| engine.list_sessions(user_id, query.limit)).await?;
    Ok(Json(ApiResponse::ok(sessions)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<SessionDetail> {
    let detail = blocking(&state, move |engine| engine.get_session(session_id)).await?;
    Ok(Json(ApiResponse::ok(detail)))
}

pub async fn archive_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Session> {
    let session = blocking(&state, move |engine| engine.archive_session(session_id)).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// Append the user turn, generate the reply on the runtime, then attach it.
/// Returns the assistant message.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let request = SendMessage {
        session_id: req.session_id,
        content: req.content,
        message_type: req.message_type.unwrap_or_default(),
        attachments: req.attachments.unwrap_or_default(),
        parent_id: req.parent_id,
        branch_id: req.branch_id,
    };
    let pending = blocking(&state, move |engine| engine.begin_exchange(request)).await?;
    let reply = pending.generate(state.generator.as_ref()).await?;
    let message = blocking(&state, move |engine| engine.complete_exchange(pending, reply)).await?;
    Ok(Json(ApiResponse::ok(message)))
}

pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Message>> {
    let messages = blocking(&state, move |engine| engine.history(session_id, query.branch_id)).await?;
    Ok(Json(ApiResponse::ok(messages)))
}

pub async fn forest(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<ForestQuery>,
) -> ApiResult<Vec<Message>> {
    let messages =
        blocking(&state, move |engine| engine.forest(session_id, query.include_deleted)).await?;
    Ok(Json(ApiResponse::ok(messages)))
}
