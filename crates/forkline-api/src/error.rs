use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use forkline_core::EngineError;
use forkline_types::api::ApiResponse;
use thiserror::Error;
use tracing::error;

/// Handler error. Rendered as the client envelope with `data: null`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(e) => match e {
                EngineError::SessionNotFound(_)
                | EngineError::MessageNotFound(_)
                | EngineError::BranchNotFound(_)
                | EngineError::VersionNotFound { .. } => StatusCode::NOT_FOUND,

                EngineError::SessionArchived(_)
                | EngineError::DuplicateName(_)
                | EngineError::MainBranchProtected
                | EngineError::HasChildren(_)
                | EngineError::NotDeleted(_)
                | EngineError::ParentMissing(_) => StatusCode::CONFLICT,

                EngineError::InvalidParent(_)
                | EngineError::CrossSessionBranch { .. }
                | EngineError::InvalidName(_)
                | EngineError::TargetNotOnActivePath(_)
                | EngineError::InvalidFork(_)
                | EngineError::EmptyContent
                | EngineError::DiffMismatch(_)
                | EngineError::ConfirmationRequired => StatusCode::UNPROCESSABLE_ENTITY,

                EngineError::Generation(_) | EngineError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.kind(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), "{}", self);
        }
        let body = ApiResponse::<()>::failure(status.as_u16(), self.kind(), self.to_string());
        (status, Json(body)).into_response()
    }
}
