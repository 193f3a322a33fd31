use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    store::StreamId,
    supervisor::StreamStatus,
};

pub async fn stop_stream(
    State(state): State<SharedState>,
    Path(id): Path<StreamId>,
) -> Result<Json<StreamStatus>, ApiError> {
    let status = with_supervisor(&state, move |supervisor| supervisor.stop(id)).await?;
    Ok(Json(status))
}
