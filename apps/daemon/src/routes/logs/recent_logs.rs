use axum::Json;

use crate::logger::{self, LogEvent};

pub async fn recent_logs() -> Json<Vec<LogEvent>> {
    Json(logger::recent_logs())
}
