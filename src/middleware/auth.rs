//! Authentication middleware
//!
//! Extracts the caller from a Bearer session token.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AuthService, JwtError};
use crate::error::ApiError;
use crate::models::UserRole;

/// Authenticated user extracted from an access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub role: UserRole,
    pub jti: String,
}

/// Extractor for authenticated users
///
/// Rejects missing, invalid, expired and refresh tokens with 401.
///
/// ```rust,ignore
/// async fn protected_handler(user: AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, user {}", user.user_id)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    unauthorized("Authorization header with Bearer token required")
                })?;

        let auth_service = Arc::<AuthService>::from_ref(state);

        let claims = auth_service
            .verify_access_token(bearer.token())
            .map_err(|e| match e {
                JwtError::TokenExpired => unauthorized("Token has expired"),
                _ => unauthorized("Invalid token"),
            })?;

        let user_id = claims
            .user_id()
            .map_err(|_| unauthorized("Invalid user ID in token"))?;

        let role = match claims.role.as_str() {
            "buyer" => UserRole::Buyer,
            "seller" => UserRole::Seller,
            "admin" => UserRole::Admin,
            _ => return Err(unauthorized("Invalid role in token")),
        };

        Ok(AuthenticatedUser {
            user_id,
            wallet_address: claims.wallet,
            email: claims.email,
            role,
            jti: claims.jti,
        })
    }
}

fn unauthorized(message: &str) -> Response {
    ApiError::Unauthorized(message.to_string()).into_response()
}
