use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::debug;

use forkline_core::EditRequest;
use forkline_types::api::{ApiResponse, EditMessageRequest, EditMessageResponse};
use forkline_types::diff::{DiffGranularity, VersionDiff};
use forkline_types::models::{EditHistory, Message, MessageId};

use crate::error::ApiError;
use crate::middleware::Actor;
use crate::state::{AppState, blocking};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffQuery {
    pub from_version: u32,
    pub to_version: u32,
    #[serde(default)]
    pub granularity: DiffGranularity,
}

/// Edit a message and optionally generate a fresh reply to it.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(Actor(editor_id)): Extension<Actor>,
    Json(req): Json<EditMessageRequest>,
) -> ApiResult<EditMessageResponse> {
    let message_id = req.message_id;
    let regenerate = req.regenerate_response.unwrap_or(false);
    let edit = EditRequest {
        message_id,
        new_content: req.new_content,
        reason: req.edit_reason,
        editor_id,
    };
    let message = blocking(&state, move |engine| engine.edit_message(edit)).await?;

    let mut regenerated_reply = None;
    if regenerate {
        let pending = blocking(&state, move |engine| engine.begin_regeneration(message_id)).await?;
        match pending {
            Some(pending) => {
                let reply = pending.generate(state.generator.as_ref()).await?;
                let reply =
                    blocking(&state, move |engine| engine.complete_exchange(pending, reply)).await?;
                regenerated_reply = Some(reply);
            }
            None => debug!(message_id, "Regeneration skipped for non-user message"),
        }
    }

    Ok(Json(ApiResponse::ok(EditMessageResponse {
        message,
        regenerated_reply,
    })))
}

pub async fn edit_history(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Vec<EditHistory>> {
    let history = blocking(&state, move |engine| engine.edit_history(message_id)).await?;
    Ok(Json(ApiResponse::ok(history)))
}

pub async fn restore_version(
    State(state): State<AppState>,
    Extension(Actor(editor_id)): Extension<Actor>,
    Path((message_id, version)): Path<(MessageId, u32)>,
) -> ApiResult<Message> {
    let message = blocking(&state, move |engine| {
        engine.restore_version(message_id, version, editor_id)
    })
    .await?;
    Ok(Json(ApiResponse::ok(message)))
}

pub async fn diff_versions(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<VersionDiff> {
    let diff = blocking(&state, move |engine| {
        engine.diff_versions(message_id, query.from_version, query.to_version, query.granularity)
    })
    .await?;
    Ok(Json(ApiResponse::ok(diff)))
}
