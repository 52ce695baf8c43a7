//! Typed errors and HTTP mapping.

use crate::store::StorageError;
use crate::validation::ErrorMap;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Raised while resolving a schema. A schema that fails to resolve must not serve traffic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema resolution: {0}")]
    Resolution(String),
    #[error("unsupported field kind '{kind}' for field '{field}'")]
    UnsupportedFieldKind { field: String, kind: String },
}

/// Errors from declarative configuration (files, env, dispatcher wiring).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Body decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("malformed body: {0}")]
    Malformed(String),
    #[error("body must be an object")]
    NotAnObject,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid input")]
    Validation(ErrorMap),
    #[error("unsupported nested write: {0}")]
    UnsupportedNestedWrite(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("authentication credentials were not provided")]
    NotAuthenticated,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not acceptable: {0}")]
    NotAcceptable(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage timed out")]
    StorageTimeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Schema(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Decode(DecodeError::UnsupportedMediaType(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Decode(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) | AppError::UnsupportedNestedWrite(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationFailed(_) | AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            AppError::StorageUnavailable(_) | AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StorageTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Schema(_) | AppError::Internal(_) => "internal_error",
            AppError::Decode(DecodeError::UnsupportedMediaType(_)) => "unsupported_media_type",
            AppError::Decode(_) => "parse_error",
            AppError::Validation(_) => "validation_error",
            AppError::UnsupportedNestedWrite(_) => "unsupported_nested_write",
            AppError::AuthenticationFailed(_) => "authentication_failed",
            AppError::NotAuthenticated => "not_authenticated",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::NotAcceptable(_) => "not_acceptable",
            AppError::StorageUnavailable(_) => "service_unavailable",
            AppError::StorageTimeout => "storage_timeout",
            AppError::Cancelled => "cancelled",
        }
    }

    /// Message shown to the caller. Storage and internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Schema(_) | AppError::Internal(_) => "internal server error".into(),
            AppError::StorageUnavailable(_) => "storage unavailable, retry later".into(),
            AppError::StorageTimeout => "storage did not respond in time".into(),
            AppError::Conflict(_) => "request conflicts with existing data".into(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        }
    }

    /// Log conditions an operator must look at.
    pub fn log(&self) {
        match self {
            AppError::Schema(_) | AppError::Internal(_) | AppError::StorageUnavailable(_) => {
                tracing::error!(error = %self, "request failed");
            }
            AppError::StorageTimeout | AppError::Conflict(_) => tracing::warn!(error = %self, "request failed"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }
    }

    pub fn body(&self) -> serde_json::Value {
        crate::response::error_body(self.code(), self.public_message(), self.details())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Constraint { field: Some(field), message } => {
                let mut errors = ErrorMap::new();
                errors.add(field, message);
                AppError::Validation(errors)
            }
            StorageError::Constraint { field: None, message } => AppError::Conflict(message),
            StorageError::Unavailable(msg) => AppError::StorageUnavailable(msg),
            StorageError::Timeout => AppError::StorageTimeout,
            StorageError::NotFound => AppError::NotFound("record".into()),
            StorageError::UnknownType(t) => AppError::Internal(format!("unknown record type {}", t)),
            StorageError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
                details: self.details(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributable_constraint_becomes_field_error() {
        let err: AppError = StorageError::Constraint {
            field: Some("title".into()),
            message: "a snippet with this title already exists".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let details = err.details().unwrap();
        assert_eq!(details["title"][0], "a snippet with this title already exists");
    }

    #[test]
    fn unattributable_constraint_is_conflict_without_detail() {
        let err: AppError = StorageError::Constraint {
            field: None,
            message: "duplicate key value violates unique constraint \"snippets_title_owner_id_key\"".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let body = err.body().to_string();
        assert!(!body.contains("snippets_title_owner_id_key"));
        assert_eq!(err.body()["error"]["message"], "request conflicts with existing data");
        assert!(err.to_string().contains("snippets_title_owner_id_key"), "detail stays available to logs");
    }

    #[test]
    fn storage_detail_is_not_leaked() {
        let err: AppError = StorageError::Unavailable("connection refused to 10.0.0.3".into()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.public_message().contains("10.0.0.3"));
        let internal = AppError::Internal("index out of bounds".into());
        assert_eq!(internal.body()["error"]["message"], "internal server error");
    }

    #[test]
    fn media_type_maps_to_415() {
        let err = AppError::from(DecodeError::UnsupportedMediaType("text/csv".into()));
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
