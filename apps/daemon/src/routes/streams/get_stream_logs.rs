use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    store::StreamId,
    supervisor::StreamLogs,
};

pub async fn get_stream_logs(
    State(state): State<SharedState>,
    Path(id): Path<StreamId>,
) -> Result<Json<StreamLogs>, ApiError> {
    let logs = with_supervisor(&state, move |supervisor| supervisor.logs(id)).await?;
    Ok(Json(logs))
}
