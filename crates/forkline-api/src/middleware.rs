use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use forkline_types::models::UserId;

use crate::error::ApiError;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// The user a request acts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

/// Resolve the acting user from `X-User-Id`, falling back to the configured
/// default user when the header is absent.
pub async fn resolve_actor(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let actor = match req.headers().get(USER_HEADER) {
        None => state.default_user,
        Some(value) => match value.to_str().ok().and_then(|v| v.trim().parse().ok()) {
            Some(id) => id,
            None => {
                return ApiError::BadRequest("X-User-Id must be an integer".into()).into_response();
            }
        },
    };

    req.extensions_mut().insert(Actor(actor));
    next.run(req).await
}
