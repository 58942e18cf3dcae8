use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use tracing::error;

use crate::error::ChatError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        use ChatError::*;
        match self.0.downcast_ref::<ChatError>() {
            Some(NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            Some(Forbidden(_)) => StatusCode::FORBIDDEN,
            Some(InvalidRequest(_) | Malformed(_)) => StatusCode::BAD_REQUEST,
            Some(Conflict(_) | DuplicateConnection(_)) => StatusCode::CONFLICT,
            Some(Overloaded) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
