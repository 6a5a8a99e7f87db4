//! Error taxonomy for the three pipeline stages and the scheduled entry points.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Failure to obtain a raw observation from the provider.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ExtractError {
    pub fn http(status: u16, body: &str) -> Self {
        ExtractError::Http { status, body: truncate_body(body) }
    }
}

/// Reason a flattened observation was rejected before loading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Store failure, classified from the underlying SQLite error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("store connection lost: {0}")]
    ConnectionLost(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("store error: {0}")]
    Unknown(String),
}

impl LoadError {
    pub fn not_connected() -> Self {
        LoadError::ConnectionLost("no open connection".to_string())
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, LoadError::ConnectionLost(_))
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt,
            ) => LoadError::ConnectionLost(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => LoadError::ConstraintViolation(err.to_string()),
            _ => LoadError::Unknown(err.to_string()),
        }
    }
}

/// Per-city failure as recorded in a run report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extract failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("transform failed: {0}")]
    Transform(#[from] ValidationError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

/// Failure inside a scheduled invocation. Logged by the loop, never fatal.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("retention sweep failed: {0}")]
    Retention(LoadError),
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
