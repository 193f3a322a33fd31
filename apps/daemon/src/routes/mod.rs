use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::{error::SupervisorError, state::SharedState, supervisor::Supervisor};

pub mod available_streams;
pub mod error;
pub mod get_status;
pub mod logs;
pub mod shutdown;
pub mod streams;

use error::ApiError;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(get_status::get_status))
        .route(
            "/streams",
            get(streams::list_streams::list_streams).post(streams::add_stream::add_stream),
        )
        .route(
            "/streams/:id",
            get(streams::get_stream::get_stream)
                .put(streams::configure_stream::configure_stream)
                .delete(streams::delete_stream::delete_stream),
        )
        .route("/streams/:id/start", post(streams::start_stream::start_stream))
        .route("/streams/:id/stop", post(streams::stop_stream::stop_stream))
        .route("/streams/:id/logs", get(streams::get_stream_logs::get_stream_logs))
        .route("/available_streams", get(available_streams::available_streams))
        .route("/logs", get(logs::recent_logs::recent_logs))
        .route("/logs/stream", get(logs::get_logs::get_logs))
        .route("/shutdown", post(shutdown::shutdown))
        .with_state(state)
        .layer(cors)
}

/// Runs a supervisor call off the async executor; spawning and stopping
/// encoders block.
pub(crate) async fn with_supervisor<T, F>(state: &SharedState, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&Supervisor) -> Result<T, SupervisorError> + Send + 'static,
    T: Send + 'static,
{
    let supervisor = state.supervisor.clone();
    tokio::task::spawn_blocking(move || call(&supervisor))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map_err(ApiError::from)
}
