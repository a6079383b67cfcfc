pub mod branches;
pub mod conversation;
pub mod edits;
pub mod error;
pub mod generator;
pub mod manage;
pub mod middleware;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::state::AppState;

pub async fn health() -> &'static str {
    "ok"
}

/// Every conversation route. Layers for tracing and CORS are added by the
/// server binary.
pub fn router(state: AppState) -> Router {
    let conversation = Router::new()
        .route("/session", post(conversation::create_session))
        .route("/sessions", get(conversation::list_sessions))
        .route("/message", post(conversation::send_message))
        .route("/{id}", get(conversation::get_session))
        .route("/{id}/archive", put(conversation::archive_session))
        .route("/{id}/history", get(conversation::history))
        .route("/{id}/forest", get(conversation::forest));

    let branch = Router::new()
        .route("/create", post(branches::create_branch))
        .route("/fork-here", post(branches::fork_here))
        .route("/detail/{id}", get(branches::get_branch))
        .route("/{id}/switch/{branch_id}", put(branches::switch_branch))
        .route("/{id}/list", get(branches::list_branches))
        .route("/{id}/tree", get(branches::branch_tree))
        .route("/{id}/rename", put(branches::rename_branch))
        .route("/{id}", delete(branches::delete_branch));

    let edit = Router::new()
        .route("/edit", put(edits::edit_message))
        .route("/{id}/history", get(edits::edit_history))
        .route("/{id}/restore/{version}", put(edits::restore_version))
        .route("/{id}/diff", get(edits::diff_versions));

    let manage = Router::new()
        .route("/batch", delete(manage::batch_delete))
        .route("/rollback", post(manage::rollback))
        .route("/{id}", delete(manage::delete_message))
        .route("/{id}/restore", put(manage::restore_message))
        .route("/{id}/rollback-points", get(manage::rollback_points))
        .route("/{id}/forward", post(manage::forward))
        .route("/{id}/cleanup", delete(manage::cleanup));

    let api = Router::new()
        .nest("/conversation", conversation)
        .nest("/branch", branch)
        .nest("/edit/message", edit)
        .nest("/message/manage", manage)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_actor,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .with_state(state)
}
