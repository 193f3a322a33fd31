use axum::{extract::State, http::StatusCode, Json};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    supervisor::StreamStatus,
};

pub async fn add_stream(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<StreamStatus>), ApiError> {
    let status = with_supervisor(&state, |supervisor| supervisor.add()).await?;
    Ok((StatusCode::CREATED, Json(status)))
}
