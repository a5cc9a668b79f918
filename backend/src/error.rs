// Error translation for the Control Plane API
// Maps the workspace error taxonomy onto HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lodestar_core::Error;
use serde::{Deserialize, Serialize};

/// Unified error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
}

/// Transport wrapper around the workspace error
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match &self.0 {
            Error::InvalidInput(_) => "ERR_INVALID_INPUT",
            Error::Unauthenticated(_)
            | Error::InvalidToken(_)
            | Error::InvalidCredentials
            | Error::UserNotFound(_)
            | Error::UserDisabled(_)
            | Error::UserLocked(_) => "ERR_UNAUTHENTICATED",
            Error::PermissionDenied(_) => "ERR_PERMISSION_DENIED",
            Error::NotFound(_) => "ERR_NOT_FOUND",
            Error::Conflict(_) => "ERR_CONFLICT",
            Error::LinkDisabled(_) => "ERR_LINK_DISABLED",
            Error::LinkExpired(_) => "ERR_LINK_EXPIRED",
            Error::LinkExhausted(_) => "ERR_LINK_EXHAUSTED",
            Error::PasswordRequired => "ERR_PASSWORD_REQUIRED",
            Error::PasswordWrong => "ERR_PASSWORD_WRONG",
            Error::ReferenceUnresolved(_) => "ERR_REFERENCE_UNRESOLVED",
            Error::StoreUnavailable(_) => "ERR_STORE_UNAVAILABLE",
            Error::LeaseError(_) => "ERR_LEASE",
            _ => "ERR_INTERNAL",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated(_)
            | Error::InvalidToken(_)
            | Error::InvalidCredentials
            | Error::UserNotFound(_)
            | Error::UserDisabled(_)
            | Error::UserLocked(_)
            | Error::PasswordRequired => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied(_) | Error::PasswordWrong | Error::LinkDisabled(_) => {
                StatusCode::FORBIDDEN
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::LinkExpired(_) | Error::LinkExhausted(_) => StatusCode::GONE,
            Error::ReferenceUnresolved(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error_code: self.error_code().to_string(),
            message: self.0.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = ?self.0, "API error");
        } else {
            tracing::warn!(error = ?self.0, "API error");
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(
            ApiError(Error::Unauthenticated("x".into())).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(Error::PermissionDenied("x".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(Error::NotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(Error::Conflict("x".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError(Error::InvalidInput("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::Internal("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError(Error::TransactionConflict("x".into())).error_code(),
            "ERR_INTERNAL"
        );
        assert_eq!(
            ApiError(Error::LinkExhausted("x".into())).error_code(),
            "ERR_LINK_EXHAUSTED"
        );
    }
}
