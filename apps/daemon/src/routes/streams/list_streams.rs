use axum::{extract::State, Json};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    supervisor::StreamStatus,
};

pub async fn list_streams(State(state): State<SharedState>) -> Result<Json<Vec<StreamStatus>>, ApiError> {
    let streams = with_supervisor(&state, |supervisor| Ok(supervisor.list())).await?;
    Ok(Json(streams))
}
