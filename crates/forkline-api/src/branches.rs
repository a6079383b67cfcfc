use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use forkline_core::BranchSpec;
use forkline_types::api::{ApiResponse, CreateBranchRequest};
use forkline_types::models::{Branch, BranchId, BranchTree, BranchView, SessionId};

use crate::error::ApiError;
use crate::state::{AppState, blocking};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkHereQuery {
    pub session_id: SessionId,
    pub branch_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenameQuery {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_branch(
    State(state): State<AppState>,
    Json(req): Json<CreateBranchRequest>,
) -> ApiResult<Branch> {
    let spec = BranchSpec {
        fork_message_id: req.fork_message_id,
        parent_branch_id: req.parent_branch_id,
        name: req.branch_name,
        description: req.description.or(req.fork_reason),
        switch_to_new_branch: req.switch_to_new_branch.unwrap_or(false),
    };
    let branch = blocking(&state, move |engine| engine.create_branch(req.session_id, spec)).await?;
    Ok(Json(ApiResponse::ok(branch)))
}

pub async fn fork_here(
    State(state): State<AppState>,
    Query(query): Query<ForkHereQuery>,
) -> ApiResult<Branch> {
    let branch =
        blocking(&state, move |engine| engine.fork_here(query.session_id, query.branch_name)).await?;
    Ok(Json(ApiResponse::ok(branch)))
}

pub async fn switch_branch(
    State(state): State<AppState>,
    Path((session_id, branch_id)): Path<(SessionId, BranchId)>,
) -> ApiResult<Branch> {
    let branch = blocking(&state, move |engine| engine.switch_branch(session_id, branch_id)).await?;
    Ok(Json(ApiResponse::ok(branch)))
}

pub async fn list_branches(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<BranchView>> {
    let branches = blocking(&state, move |engine| {
        engine.list_branches(session_id, query.include_deleted)
    })
    .await?;
    Ok(Json(ApiResponse::ok(branches)))
}

pub async fn branch_tree(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<BranchTree> {
    let tree = blocking(&state, move |engine| engine.branch_tree(session_id)).await?;
    Ok(Json(ApiResponse::ok(tree)))
}

pub async fn get_branch(
    State(state): State<AppState>,
    Path(branch_id): Path<BranchId>,
) -> ApiResult<BranchView> {
    let view = blocking(&state, move |engine| engine.get_branch(branch_id)).await?;
    Ok(Json(ApiResponse::ok(view)))
}

pub async fn rename_branch(
    State(state): State<AppState>,
    Path(branch_id): Path<BranchId>,
    Query(query): Query<RenameQuery>,
) -> ApiResult<Branch> {
    let branch = blocking(&state, move |engine| {
        engine.rename_branch(branch_id, &query.name, query.description)
    })
    .await?;
    Ok(Json(ApiResponse::ok(branch)))
}

pub async fn delete_branch(
    State(state): State<AppState>,
    Path(branch_id): Path<BranchId>,
) -> ApiResult<bool> {
    blocking(&state, move |engine| engine.delete_branch(branch_id)).await?;
    Ok(Json(ApiResponse::ok(true)))
}
