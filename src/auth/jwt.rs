//! Session credential minting and validation
//!
//! Access and refresh tokens are HS256 JWTs bound to the user id. Nothing
//! is persisted: issuance is stateless.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::UserRecord;

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Session token claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub token_type: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|e| JwtError::InvalidToken(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Freshly minted credentials for one authentication
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub subject_user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Mints and checks session tokens
#[derive(Clone)]
pub struct CredentialIssuer {
    secret: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_days: i64,
}

impl CredentialIssuer {
    pub fn new(secret: String, access_token_ttl_seconds: i64, refresh_token_ttl_days: i64) -> Self {
        Self {
            secret,
            access_token_ttl_seconds,
            refresh_token_ttl_days,
        }
    }

    /// Mint an access and a refresh token for `user`
    pub fn issue(&self, user: &UserRecord) -> Result<SessionCredential, JwtError> {
        let now = Utc::now();
        let access_token = self.generate_token(
            user,
            now,
            Duration::seconds(self.access_token_ttl_seconds),
            TokenType::Access,
        )?;
        let refresh_token = self.generate_token(
            user,
            now,
            Duration::days(self.refresh_token_ttl_days),
            TokenType::Refresh,
        )?;

        Ok(SessionCredential {
            access_token,
            refresh_token,
            subject_user_id: user.id,
            issued_at: now,
            expires_in: self.access_token_ttl_seconds,
        })
    }

    fn generate_token(
        &self,
        user: &UserRecord,
        now: DateTime<Utc>,
        ttl: Duration,
        token_type: TokenType,
    ) -> Result<String, JwtError> {
        let claims = Claims {
            sub: user.id.to_string(),
            wallet: user.wallet_address.clone(),
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type: token_type.as_str().to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| JwtError::EncodingFailed(e.to_string()))
    }

    /// Verify a session token and require the given type
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let claims = verify_token(token, &self.secret)?;
        if claims.token_type != expected.as_str() {
            return Err(JwtError::InvalidToken(format!(
                "expected {} token",
                expected.as_str()
            )));
        }
        Ok(claims)
    }
}

/// Verify and decode a session token
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        _ => JwtError::DecodingFailed(e.to_string()),
    })?;

    Ok(token_data.claims)
}
