use axum::{extract::State, Json};
use serde::Serialize;

use crate::{
    routes::{error::ApiError, with_supervisor},
    state::SharedState,
};

#[derive(Serialize)]
pub struct StatusResponse {
    pub streams: usize,
    pub desired_running: usize,
    pub running: usize,
    pub store_path: String,
    pub log_lines: usize,
}

pub async fn get_status(State(state): State<SharedState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = with_supervisor(&state, |supervisor| {
        let streams = supervisor.list();
        Ok(StatusResponse {
            streams: streams.len(),
            desired_running: streams.iter().filter(|s| s.should_be_running).count(),
            running: streams.iter().filter(|s| s.running).count(),
            store_path: supervisor.store_path().display().to_string(),
            log_lines: supervisor.settings().log_capacity,
        })
    })
    .await?;

    Ok(Json(status))
}
