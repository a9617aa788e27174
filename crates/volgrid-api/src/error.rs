//! API error type and JSON error response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use volgrid_core::{Error as CoreError, ErrorCode};

/// API-level error that can be converted to an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Entity that caused the error (volume name, peer id, etc.).
    pub resource: Option<String>,
    /// Request ID for tracking.
    pub request_id: String,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(rename = "request-id")]
    request_id: String,
}

impl ApiError {
    /// Creates a new API error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            resource: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Adds resource information to the error.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// The HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorBody {
            code: self.code.as_str(),
            message: self.message,
            resource: self.resource,
            request_id: self.request_id,
        });
        (status, body).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Op { code, message, resource } => {
                let mut api_err = ApiError::new(code, message);
                if let Some(r) = resource {
                    api_err = api_err.with_resource(r);
                }
                api_err
            }
            other => ApiError::new(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(ApiError::new(ErrorCode::NotFound, "").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::new(ErrorCode::Forbidden, "").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::new(ErrorCode::LockTimeout, "").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::new(ErrorCode::MalformedRequest, "").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_from_core_error_keeps_resource() {
        let core = CoreError::op_with_resource(ErrorCode::NotFound, "volume not found", "vol");
        let api = ApiError::from(core);
        assert_eq!(api.code, ErrorCode::NotFound);
        assert_eq!(api.resource.as_deref(), Some("vol"));
        assert_eq!(api.message, "volume not found");
    }
}
