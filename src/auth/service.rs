//! Authentication service
//!
//! Composes the nonce store, signature recovery, token verification,
//! identity resolution and credential minting into the wallet and social
//! login flows.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AuthTokensResponse, NonceResponse, SocialLoginRequest, UserRecord, VerifyWalletRequest};
use crate::store::{StoreError, UserStore};

use super::crypto::{normalize_address, verify_wallet_signature, CryptoError};
use super::identity::IdentityResolver;
use super::jwt::{Claims, CredentialIssuer, JwtError, SessionCredential, TokenType};
use super::nonce::NonceStore;
use super::oauth::{OAuthError, TokenRejection, TokenVerifier};
use super::providers::{Provider, ProviderRegistry, RegistryError};

/// Auth service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddressFormat(String),

    #[error("Nonce invalid, already used or expired")]
    InvalidOrExpiredNonce,

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Signature does not match wallet")]
    SignatureMismatch,

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("ID token is required")]
    MissingIdToken,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(TokenRejection),

    #[error("Email not verified by provider")]
    EmailNotVerified,

    #[error("Token has no email claim")]
    MissingEmailClaim,

    #[error("Userinfo mismatch: {0}")]
    UserinfoMismatch(String),

    #[error("Provider signing keys unavailable: {0}")]
    KeyFetchFailed(String),

    #[error("Identity store conflict: {0}")]
    IdentityStoreConflict(String),

    #[error("Identity store error: {0}")]
    Store(String),

    #[error("Credential error: {0}")]
    Credential(String),
}

impl AuthError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidAddressFormat(_) => "INVALID_ADDRESS_FORMAT",
            AuthError::InvalidOrExpiredNonce => "INVALID_OR_EXPIRED_NONCE",
            AuthError::MalformedSignature(_) => "MALFORMED_SIGNATURE",
            AuthError::SignatureMismatch => "SIGNATURE_MISMATCH",
            AuthError::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            AuthError::MissingIdToken => "MISSING_ID_TOKEN",
            AuthError::MalformedToken(_) => "MALFORMED_TOKEN",
            AuthError::UnknownSigningKey(_) => "UNKNOWN_SIGNING_KEY",
            AuthError::TokenInvalid(_) => "TOKEN_INVALID",
            AuthError::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            AuthError::MissingEmailClaim => "MISSING_EMAIL_CLAIM",
            AuthError::UserinfoMismatch(_) => "USERINFO_MISMATCH",
            AuthError::KeyFetchFailed(_) => "KEY_FETCH_FAILED",
            AuthError::IdentityStoreConflict(_) => "IDENTITY_STORE_CONFLICT",
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::Credential(_) => "CREDENTIAL_ERROR",
        }
    }

    /// Whether the request itself caused the failure
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            AuthError::KeyFetchFailed(_)
                | AuthError::IdentityStoreConflict(_)
                | AuthError::Store(_)
                | AuthError::Credential(_)
        )
    }
}

impl From<CryptoError> for AuthError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidAddressFormat(reason) => AuthError::InvalidAddressFormat(reason),
            CryptoError::MalformedSignature(reason) => AuthError::MalformedSignature(reason),
        }
    }
}

impl From<OAuthError> for AuthError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::MalformedToken(reason) => AuthError::MalformedToken(reason),
            OAuthError::UnknownSigningKey(kid) => AuthError::UnknownSigningKey(kid),
            OAuthError::TokenInvalid(rejection) => AuthError::TokenInvalid(rejection),
            OAuthError::MissingEmailClaim => AuthError::MissingEmailClaim,
            OAuthError::EmailNotVerified => AuthError::EmailNotVerified,
            OAuthError::UserinfoMismatch(reason) => AuthError::UserinfoMismatch(reason),
            OAuthError::KeyFetchFailed(reason) => AuthError::KeyFetchFailed(reason),
        }
    }
}

impl From<RegistryError> for AuthError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Unknown(name) => AuthError::UnsupportedProvider(name),
            RegistryError::Disabled(provider) => {
                AuthError::UnsupportedProvider(provider.to_string())
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) => AuthError::IdentityStoreConflict(e.to_string()),
            other => AuthError::Store(other.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(e: JwtError) -> Self {
        AuthError::Credential(e.to_string())
    }
}

/// Authentication service
pub struct AuthService {
    nonces: Arc<dyn NonceStore>,
    users: Arc<dyn UserStore>,
    providers: ProviderRegistry,
    verifier: TokenVerifier,
    resolver: IdentityResolver,
    issuer: CredentialIssuer,
}

impl AuthService {
    pub fn new(
        nonces: Arc<dyn NonceStore>,
        users: Arc<dyn UserStore>,
        providers: ProviderRegistry,
        verifier: TokenVerifier,
        issuer: CredentialIssuer,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(users.clone()),
            nonces,
            users,
            providers,
            verifier,
            issuer,
        }
    }

    /// Issue a challenge for a wallet, replacing any pending one
    pub async fn request_nonce(&self, wallet_address: &str) -> Result<NonceResponse, AuthError> {
        let wallet_address = normalize_address(wallet_address)?;
        let nonce = self.nonces.issue(&wallet_address).await?;

        tracing::debug!(wallet = %wallet_address, expires_at = %nonce.expires_at, "Issued wallet challenge");

        Ok(NonceResponse {
            message: challenge_message(&wallet_address, &nonce.value, &nonce.issued_at.to_rfc3339()),
            nonce: nonce.value,
            expires_in_seconds: self.nonces.ttl().num_seconds(),
            expires_at: nonce.expires_at,
        })
    }

    /// Verify a signed challenge and issue credentials
    pub async fn verify_wallet(
        &self,
        request: &VerifyWalletRequest,
    ) -> Result<AuthTokensResponse, AuthError> {
        let result = self.verify_wallet_inner(request).await;
        audit("wallet", &request.wallet_address, &result);
        result
    }

    async fn verify_wallet_inner(
        &self,
        request: &VerifyWalletRequest,
    ) -> Result<AuthTokensResponse, AuthError> {
        let wallet_address = normalize_address(&request.wallet_address)?;

        // Consuming the nonce gates all cryptographic work. Once consumed it
        // stays consumed whatever happens below.
        if !self.nonces.consume(&wallet_address, &request.nonce).await? {
            return Err(AuthError::InvalidOrExpiredNonce);
        }

        if !request.message.contains(&format!("Nonce: {}", request.nonce)) {
            return Err(AuthError::SignatureMismatch);
        }

        if !verify_wallet_signature(&request.message, &request.signature, &wallet_address)? {
            return Err(AuthError::SignatureMismatch);
        }

        let (user, created) = self.resolver.resolve_by_wallet(&wallet_address).await?;
        let credential = self.issuer.issue(&user)?;

        Ok(tokens_response(credential, user, created))
    }

    /// Verify a provider ID token and issue credentials
    ///
    /// Profile fields supplied by the client are ignored.
    pub async fn social_login(
        &self,
        request: &SocialLoginRequest,
    ) -> Result<AuthTokensResponse, AuthError> {
        let result = self.social_login_inner(request).await;
        audit("social", &request.provider, &result);
        result
    }

    async fn social_login_inner(
        &self,
        request: &SocialLoginRequest,
    ) -> Result<AuthTokensResponse, AuthError> {
        let config = self.providers.get(&request.provider)?;
        let audience = config
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::UnsupportedProvider(request.provider.clone()))?;

        let id_token = request
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingIdToken)?;

        let identity = self.verifier.verify(config, id_token, audience).await?;

        if let Some(access_token) = request.access_token.as_deref().filter(|t| !t.is_empty()) {
            self.verifier
                .cross_check_userinfo(config, access_token, &identity)
                .await?;
        }

        let (user, created) = self.resolver.resolve_by_verified_identity(&identity).await?;
        let credential = self.issuer.issue(&user)?;

        Ok(tokens_response(credential, user, created))
    }

    /// Validate a session access token
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        self.issuer.verify(token, TokenType::Access)
    }

    pub async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.users.find_by_id(user_id).await?)
    }

    /// Providers that accept logins
    pub fn enabled_providers(&self) -> Vec<Provider> {
        self.providers.enabled()
    }
}

/// Human-readable challenge the wallet signs
pub fn challenge_message(wallet_address: &str, nonce: &str, issued_at: &str) -> String {
    format!(
        "Sign this message to sign in to the marketplace.\n\nWallet: {}\nNonce: {}\nIssued At: {}",
        wallet_address, nonce, issued_at
    )
}

fn tokens_response(credential: SessionCredential, user: UserRecord, created: bool) -> AuthTokensResponse {
    AuthTokensResponse {
        access_token: credential.access_token,
        refresh_token: credential.refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: credential.expires_in,
        user: user.into(),
        created,
    }
}

fn audit(flow: &str, subject: &str, result: &Result<AuthTokensResponse, AuthError>) {
    match result {
        Ok(response) => tracing::info!(
            flow,
            subject,
            user_id = %response.user.id,
            created = response.created,
            "Authentication succeeded"
        ),
        Err(e) if e.is_client_error() => tracing::warn!(
            flow,
            subject,
            code = e.error_code(),
            reason = %e,
            "Authentication rejected"
        ),
        Err(e) => tracing::error!(
            flow,
            subject,
            code = e.error_code(),
            error = %e,
            "Authentication failed"
        ),
    }
}
