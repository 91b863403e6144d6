use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StorageError;
use crate::tfc::TfcError;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Bad user input. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The backend configuration is missing something the operation needs.
    #[error("{0}")]
    Config(String),

    #[error("{action}: {source}")]
    Remote {
        action: String,
        #[source]
        source: TfcError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Root rotation minted a token remotely but could not save it.
    #[error(
        "new {kind} token {token_id} was minted remotely but saving it failed; \
         the stored configuration still holds the previous token. Revoke or record \
         the new token manually: {source}"
    )]
    RotationNotPersisted {
        kind: String,
        token_id: String,
        #[source]
        source: StorageError,
    },

    /// The rotation manager accepted a job change but the config write failed.
    #[error(
        "write to storage failed but the rotation manager still succeeded; \
         operation={operation}, path={path}, storageError={source}"
    )]
    StorageAfterRotationJob {
        operation: &'static str,
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("unsupported path: {0}")]
    UnsupportedPath(String),

    #[error("unsupported operation {operation} on path '{path}'")]
    UnsupportedOperation { operation: String, path: String },
}

impl BackendError {
    pub fn remote(action: impl Into<String>, source: TfcError) -> Self {
        BackendError::Remote { action: action.into(), source }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BackendError::Validation(msg.into())
    }

    /// True for errors caused by the caller's input rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BackendError::Validation(_)
                | BackendError::NotFound(_)
                | BackendError::Config(_)
                | BackendError::UnsupportedPath(_)
                | BackendError::UnsupportedOperation { .. }
        )
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            BackendError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "validation_failed"),
            BackendError::NotFound(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "not_found"),
            BackendError::Config(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "not_configured"),
            BackendError::Remote { source: TfcError::Unauthorized, .. } => {
                (StatusCode::BAD_GATEWAY, "upstream_error", "remote_unauthorized")
            }
            BackendError::Remote { source: TfcError::RateLimited, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "upstream_error", "remote_rate_limited")
            }
            BackendError::Remote { .. } => (StatusCode::BAD_GATEWAY, "upstream_error", "remote_failed"),
            BackendError::UnsupportedPath(_) => (StatusCode::NOT_FOUND, "invalid_request_error", "unsupported_path"),
            BackendError::UnsupportedOperation { .. } => {
                (StatusCode::METHOD_NOT_ALLOWED, "invalid_request_error", "unsupported_operation")
            }
            BackendError::RotationNotPersisted { .. } | BackendError::StorageAfterRotationJob { .. } => {
                tracing::error!(error = %self, "partial state change needs operator attention");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "partial_failure")
            }
            BackendError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "storage_failed")
            }
        };

        // partial failures carry remediation text the operator needs verbatim
        let msg = match &self {
            BackendError::Storage(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
