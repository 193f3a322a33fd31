use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::PoisonError;

use crate::{logger, state::SharedState};

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub shutting_down: bool,
}

/// Encoders are stopped by the server task once the listener has drained.
pub async fn shutdown(State(state): State<SharedState>) -> Json<ShutdownResponse> {
    let tx = state
        .shutdown_tx
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    let shutting_down = match tx {
        Some(tx) => {
            logger::info("daemon", "shutdown requested");
            tx.send(()).is_ok()
        }
        None => false,
    };

    Json(ShutdownResponse { shutting_down })
}
