use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::Error;

/// Handler error: maps the service error taxonomy onto HTTP statuses.
///
/// Client mistakes echo their message. Server-side faults are logged with
/// full detail but answered with a generic message.
#[derive(Debug)]
pub struct AppError(pub Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::NotFound { entity, .. } => (StatusCode::NOT_FOUND, format!("{entity} not found")),
            Error::Conflict(_) => {
                warn!(error = %self.0, "Document update lost a race");
                (
                    StatusCode::CONFLICT,
                    "Configuration changed concurrently, please retry".to_owned(),
                )
            }
            Error::ConfigurationMissing(_) | Error::ConfigurationInvalid { .. } => {
                error!(error = %self.0, "Configuration unavailable");
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration unavailable".to_owned())
            }
            Error::StoreUnavailable(_) => {
                error!(error = %self.0, "Telemetry store unavailable");
                (StatusCode::INTERNAL_SERVER_ERROR, "Telemetry store unavailable".to_owned())
            }
            Error::PersistFailed { .. } => {
                error!(error = %self.0, "Failed to persist document");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save changes".to_owned())
            }
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl<E: Into<Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

/// Body that failed to parse is a client error like any other validation
/// failure.
pub fn bad_body(rejection: JsonRejection) -> AppError {
    AppError(Error::Validation(format!("Invalid request body: {}", rejection.body_text())))
}

pub fn bad_query(rejection: QueryRejection) -> AppError {
    AppError(Error::Validation(format!("Invalid query: {}", rejection.body_text())))
}
