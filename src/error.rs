//! Error handling module
//!
//! One error type for the mirroring engine and the HTTP surface in front of it.
//! Per-field decryption failures are not errors here: they travel inside
//! [`crate::audit::FieldView::DecryptionError`] so one bad cell never hides a row.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Table not found: {0}")]
    NotFound(String),

    #[error("Unsupported column type '{native_type}' for column '{column}'")]
    UnsupportedType { column: String, native_type: String },

    #[error("Shadow table {table} has drifted (missing: [{}], unexpected: [{}])", .missing.join(", "), .unexpected.join(", "))]
    SchemaDrift {
        table: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Authentication failure: ciphertext, tag or associated data did not verify")]
    AuthenticationFailure,

    #[error("Malformed cipher frame: {0}")]
    MalformedFrame(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Column name collision: {0}")]
    ColumnCollision(String),

    #[error("Table is not attached: {0}")]
    NotAttached(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio_postgres::Error> for AuditError {
    fn from(e: tokio_postgres::Error) -> Self {
        AuditError::Persistence(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AuditError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AuditError::Persistence(format!("connection pool: {}", e))
    }
}

impl AuditError {
    /// Schema-level failures abort `attach` as a whole
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            AuditError::NotFound(_)
                | AuditError::UnsupportedType { .. }
                | AuditError::SchemaDrift { .. }
                | AuditError::InvalidIdentifier(_)
                | AuditError::ColumnCollision(_)
        )
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AuditError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AuditError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string(), None),
            AuditError::UnsupportedType { .. } => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_TYPE",
                self.to_string(),
                None,
            ),
            AuditError::SchemaDrift { .. } => {
                (StatusCode::CONFLICT, "SCHEMA_DRIFT", self.to_string(), None)
            }
            AuditError::AuthenticationFailure => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "AUTHENTICATION_FAILURE",
                self.to_string(),
                None,
            ),
            AuditError::MalformedFrame(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MALFORMED_FRAME",
                self.to_string(),
                None,
            ),
            AuditError::Persistence(msg) => {
                error!("Persistence error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PERSISTENCE_ERROR",
                    "A storage error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AuditError::InvalidIdentifier(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_IDENTIFIER",
                self.to_string(),
                None,
            ),
            AuditError::ColumnCollision(_) => (
                StatusCode::BAD_REQUEST,
                "COLUMN_COLLISION",
                self.to_string(),
                None,
            ),
            AuditError::NotAttached(_) => {
                (StatusCode::CONFLICT, "NOT_ATTACHED", self.to_string(), None)
            }
            AuditError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AuditError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }
            AuditError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            AuditError::InvalidKey(_) | AuditError::Config(_) => {
                error!("Configuration error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AuditError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AuditError {
    AuditError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_message_lists_columns() {
        let err = AuditError::SchemaDrift {
            table: "public.aud_accounts".to_string(),
            missing: vec!["accounts_owner_enc".to_string()],
            unexpected: vec!["owner".to_string(), "note".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing: [accounts_owner_enc]"));
        assert!(msg.contains("unexpected: [owner, note]"));
    }

    #[test]
    fn test_schema_errors_classified() {
        assert!(AuditError::NotFound("t".into()).is_schema_error());
        assert!(AuditError::ColumnCollision("c".into()).is_schema_error());
        assert!(!AuditError::AuthenticationFailure.is_schema_error());
        assert!(!AuditError::Persistence("down".into()).is_schema_error());
    }

    #[test]
    fn test_status_codes() {
        let resp = AuditError::NotAttached("public.accounts".into()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let resp = AuditError::Forbidden("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = AuditError::Persistence("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
