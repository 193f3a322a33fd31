use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
    store::StreamId,
};

pub async fn delete_stream(
    State(state): State<SharedState>,
    Path(id): Path<StreamId>,
) -> Result<StatusCode, ApiError> {
    with_supervisor(&state, move |supervisor| supervisor.delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
