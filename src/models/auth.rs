//! Authentication request/response models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use super::UserRole;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request for a wallet challenge
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NonceRequest {
    #[validate(length(min = 1, message = "walletAddress is required"))]
    pub wallet_address: String,
}

/// Wallet challenge handed to the client
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceResponse {
    pub nonce: String,
    pub message: String,
    pub expires_in_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

/// Request to verify a signed challenge
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyWalletRequest {
    #[validate(length(min = 1, message = "walletAddress is required"))]
    pub wallet_address: String,
    #[validate(length(min = 1, message = "message is required"))]
    pub message: String,
    #[validate(length(min = 1, message = "signature is required"))]
    pub signature: String, // Hex-encoded 65-byte signature
    #[validate(length(min = 1, message = "nonce is required"))]
    pub nonce: String,
}

/// Social login request
///
/// `display_name` and `avatar` are accepted for compatibility with older
/// clients and ignored: profile data only ever comes from verified claims.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLoginRequest {
    pub provider: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Auth tokens response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
    pub created: bool,
}

/// User response (sanitized for API)
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub email_verified: bool,
    pub wallet_verified: bool,
    pub created_at: DateTime<Utc>,
}
