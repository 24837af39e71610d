//! Maps the core error taxonomy onto HTTP status codes and a uniform JSON
//! error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use phishscreen_core::error::ScreenError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(pub ScreenError);

impl From<ScreenError> for ApiError {
    fn from(err: ScreenError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScreenError::InputError(_) => StatusCode::BAD_REQUEST,
            ScreenError::PreconditionNotMet(_) => StatusCode::PRECONDITION_FAILED,
            ScreenError::TrainingInProgress => StatusCode::CONFLICT,
            ScreenError::NotFound(_) => StatusCode::NOT_FOUND,
            ScreenError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ScreenError::LlmUnavailable(_) => StatusCode::BAD_GATEWAY,
            ScreenError::StoreError(_)
            | ScreenError::StageError { .. }
            | ScreenError::Serialization(_)
            | ScreenError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorBody {
            error: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
