//! Authentication HTTP handlers

use axum::{extract::State, Json};
use validator::Validate;

use super::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{
    AuthTokensResponse, NonceRequest, NonceResponse, SocialLoginRequest, UserResponse,
    VerifyWalletRequest,
};
use crate::state::AppState;

/// POST /auth/request-nonce - Issue a wallet challenge
pub async fn request_nonce(
    State(state): State<AppState>,
    Json(req): Json<NonceRequest>,
) -> Result<Json<NonceResponse>, ApiError> {
    req.validate()?;

    let challenge = state.auth_service.request_nonce(&req.wallet_address).await?;

    Ok(Json(challenge))
}

/// POST /auth/verify-wallet - Verify a signed challenge and issue tokens
pub async fn verify_wallet(
    State(state): State<AppState>,
    Json(req): Json<VerifyWalletRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    req.validate()?;

    let tokens = state.auth_service.verify_wallet(&req).await?;

    Ok(Json(tokens))
}

/// POST /auth/social-login - Verify a provider ID token and issue tokens
pub async fn social_login(
    State(state): State<AppState>,
    Json(req): Json<SocialLoginRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    let tokens = state.auth_service.social_login(&req).await?;

    Ok(Json(tokens))
}

/// GET /auth/me - Get current authenticated user
pub async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let record = state
        .auth_service
        .find_user(user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {}", user.user_id)))?;

    Ok(Json(record.into()))
}
