use axum::{extract::State, Json};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    store::AvailableStream,
};

/// Feed for the viewer: streams that are meant to be on air.
pub async fn available_streams(
    State(state): State<SharedState>,
) -> Result<Json<Vec<AvailableStream>>, ApiError> {
    let streams = with_supervisor(&state, |supervisor| Ok(supervisor.available_streams())).await?;
    Ok(Json(streams))
}
