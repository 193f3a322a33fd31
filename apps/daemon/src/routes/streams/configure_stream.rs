use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    store::{StreamConfig, StreamId},
    supervisor::StreamStatus,
};

pub async fn configure_stream(
    State(state): State<SharedState>,
    Path(id): Path<StreamId>,
    Json(fields): Json<StreamConfig>,
) -> Result<Json<StreamStatus>, ApiError> {
    let status = with_supervisor(&state, move |supervisor| supervisor.configure(id, fields)).await?;
    Ok(Json(status))
}
