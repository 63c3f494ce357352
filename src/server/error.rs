//! HTTP error mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::io;
use thiserror::Error;

use crate::files::{FileOpsError, GuardError};
use crate::store::StoreError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Path escapes the base root, or the operation is not permitted.
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The requested byte range lies outside a file of the given size.
    #[error("range not satisfiable for size {0}")]
    RangeNotSatisfiable(u64),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unexpected failure. Logged server-side; the caller gets a generic body.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map an I/O error on `what` to 404 or 500.
    pub fn from_io(what: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(format!("{} not found", what)),
            _ => Self::Internal(format!("{}: {}", what, err)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::AccessDenied(reason) => reason.clone(),
            Self::NotFound(what) => what.clone(),
            Self::RangeNotSatisfiable(_) => "Range not satisfiable".to_string(),
            Self::BadRequest(reason) => reason.clone(),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                "Internal server error".to_string()
            }
        };

        let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();
        if let Self::RangeNotSatisfiable(size) = self {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::AccessDenied { .. } => Self::AccessDenied("Access denied".to_string()),
            GuardError::Io { source, .. } => Self::from_io("Path", source),
            GuardError::NotAbsolute(path) => {
                Self::Internal(format!("misconfigured base root {}", path.display()))
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<FileOpsError> for ApiError {
    fn from(err: FileOpsError) -> Self {
        match err {
            FileOpsError::Guard(e) => e.into(),
            FileOpsError::InvalidName(name) => Self::BadRequest(format!("Invalid name: {}", name)),
            FileOpsError::NotFound(_) => Self::NotFound("File or directory not found".to_string()),
            FileOpsError::Forbidden(reason) => Self::AccessDenied(reason.to_string()),
            FileOpsError::Store(e) => e.into(),
            FileOpsError::Io { path, source } => {
                Self::Internal(format!("{}: {}", path.display(), source))
            }
        }
    }
}
