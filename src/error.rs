use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Request(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl TrackerError {
    /// Convenience constructor for a single-message validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(vec![message.into()])
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        TrackerError::NotFound { entity, id }
    }

    pub fn to_error_code(&self) -> &'static str {
        match self {
            TrackerError::NotFound { .. } => "NOT_FOUND",
            TrackerError::Validation(_) => "VALIDATION_ERROR",
            TrackerError::Conflict(_) => "CONFLICT",
            TrackerError::Request(_) => "BAD_REQUEST",
            TrackerError::Database(_) => "DATABASE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let details = match self {
            TrackerError::Validation(messages) => messages.clone(),
            _ => Vec::new(),
        };
        ErrorResponse {
            error: self.to_string(),
            code: self.to_error_code().to_string(),
            details,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
