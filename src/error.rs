use std::path::PathBuf;

/// Failures surfaced by the telemetry, configuration and dispatch layers.
///
/// Configuration and store failures are fatal for the request or cycle that
/// hit them. `NotFound` and `Validation` are request-local.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration document not found: {}", .0.display())]
    ConfigurationMissing(PathBuf),

    #[error("configuration document {} is invalid: {reason}", .path.display())]
    ConfigurationInvalid { path: PathBuf, reason: String },

    #[error("telemetry store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("document {} was modified concurrently", .0.display())]
    Conflict(PathBuf),

    #[error("failed to save {}: {reason}", .path.display())]
    PersistFailed { path: PathBuf, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::StoreUnavailable("query timed out".to_owned())
    }
}
