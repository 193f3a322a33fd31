use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::{error::SupervisorError, logger};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Supervisor(SupervisorError),
    Internal(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        ApiError::Supervisor(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Supervisor(SupervisorError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Supervisor(SupervisorError::Start(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Supervisor(SupervisorError::Persist(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::Supervisor(err) => err.to_string(),
            ApiError::Internal(message) => {
                logger::error("http", format!("internal error: {}", message));
                "internal error".to_string()
            }
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}
