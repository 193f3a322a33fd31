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

/// Starts the stream, saving the submitted fields first when a body is sent.
pub async fn start_stream(
    State(state): State<SharedState>,
    Path(id): Path<StreamId>,
    fields: Option<Json<StreamConfig>>,
) -> Result<Json<StreamStatus>, ApiError> {
    let status = with_supervisor(&state, move |supervisor| {
        if let Some(Json(fields)) = fields {
            supervisor.configure(id, fields)?;
        }
        supervisor.start(id)
    })
    .await?;

    Ok(Json(status))
}
