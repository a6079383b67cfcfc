use std::sync::Arc;

use forkline_core::{Engine, EngineError, ReplyGenerator};
use forkline_types::models::UserId;
use tracing::error;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Engine,
    pub generator: Arc<dyn ReplyGenerator>,
    pub default_user: UserId,
}

impl AppStateInner {
    pub fn new(engine: Engine, generator: Arc<dyn ReplyGenerator>, default_user: UserId) -> AppState {
        Arc::new(Self {
            engine,
            generator,
            default_user,
        })
    }
}

/// Run a blocking engine call off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.engine))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal("worker task failed".into())
        })?
        .map_err(ApiError::from)
}
