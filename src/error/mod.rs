//! Centralized API error handling
//!
//! One error type for HTTP responses, rendered as
//! `{ "error": { "code", "message" } }`. Internal detail is logged and
//! never returned to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Auth(e) if e.is_client_error() => e.error_code(),
            ApiError::Auth(AuthError::KeyFetchFailed(_)) => "KEY_FETCH_FAILED",
            ApiError::Auth(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => auth_status(e),
        }
    }

    /// Message safe to hand to the client
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Auth(e) => auth_message(e).to_string(),
            other => other.to_string(),
        }
    }

    fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

fn auth_status(e: &AuthError) -> StatusCode {
    match e {
        AuthError::InvalidAddressFormat(_)
        | AuthError::MalformedSignature(_)
        | AuthError::UnsupportedProvider(_)
        | AuthError::MissingIdToken
        | AuthError::MalformedToken(_)
        | AuthError::MissingEmailClaim => StatusCode::BAD_REQUEST,
        AuthError::InvalidOrExpiredNonce
        | AuthError::SignatureMismatch
        | AuthError::UnknownSigningKey(_)
        | AuthError::TokenInvalid(_)
        | AuthError::EmailNotVerified
        | AuthError::UserinfoMismatch(_) => StatusCode::UNAUTHORIZED,
        AuthError::KeyFetchFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::IdentityStoreConflict(_) | AuthError::Store(_) | AuthError::Credential(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn auth_message(e: &AuthError) -> &'static str {
    match e {
        AuthError::InvalidAddressFormat(_) => "Wallet address must be a 0x-prefixed 40 hex character address",
        AuthError::InvalidOrExpiredNonce => "Nonce is invalid, already used or expired",
        AuthError::MalformedSignature(_) => "Signature is malformed",
        AuthError::SignatureMismatch => "Signature does not match wallet address",
        AuthError::UnsupportedProvider(_) => "Provider is not supported",
        AuthError::MissingIdToken => "idToken is required",
        AuthError::MalformedToken(_) => "Identity token is malformed",
        AuthError::UnknownSigningKey(_) => "Identity token signed with an unknown key",
        AuthError::TokenInvalid(_) => "Identity token is invalid",
        AuthError::EmailNotVerified => "Email is not verified by the provider",
        AuthError::MissingEmailClaim => "Identity token carries no email",
        AuthError::UserinfoMismatch(_) => "Access token does not belong to the identity token subject",
        AuthError::KeyFetchFailed(_) => "Identity provider is temporarily unavailable, retry later",
        AuthError::IdentityStoreConflict(_) | AuthError::Store(_) | AuthError::Credential(_) => {
            "Internal server error"
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if self.is_server_error() {
            tracing::error!(error = %self, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %self, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message: self.public_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenRejection;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::Auth(AuthError::InvalidOrExpiredNonce).error_code(),
            "INVALID_OR_EXPIRED_NONCE"
        );
        assert_eq!(
            ApiError::Auth(AuthError::Store("pool timed out".to_string())).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Auth(AuthError::InvalidAddressFormat("x".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Auth(AuthError::TokenInvalid(TokenRejection::Expired)).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Auth(AuthError::KeyFetchFailed("google".to_string())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Auth(AuthError::Store("pool timed out".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let err = ApiError::Auth(AuthError::Store("password authentication failed".to_string()));
        assert_eq!(err.public_message(), "Internal server error");

        let err = ApiError::Auth(AuthError::TokenInvalid(TokenRejection::BadAudience));
        assert!(!err.public_message().contains("audience"));
    }
}
