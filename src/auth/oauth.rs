//! OAuth identity token verification
//!
//! An ID token is trusted only after its signature verifies against the
//! provider's published key and its issuer, audience and time claims check
//! out. The resulting [`VerifiedIdentity`] can only be built here.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::fetcher::{FetchError, JsonFetcher};
use super::jwks::{KeySetCache, KeySetError};
use super::providers::{EmailVerification, Provider, ProviderConfig};
use crate::clock::Clock;

/// Default allowance for provider clocks running ahead of ours
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 300;

/// Why a structurally valid token was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    IssuedInFuture,
    BadIssuer,
    BadAudience,
    BadSignature,
    DisallowedAlgorithm(String),
    MissingClaim(String),
    UnusableKey(String),
    Other(String),
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Expired => f.write_str("token expired"),
            TokenRejection::IssuedInFuture => f.write_str("token issued in the future"),
            TokenRejection::BadIssuer => f.write_str("issuer not accepted"),
            TokenRejection::BadAudience => f.write_str("audience mismatch"),
            TokenRejection::BadSignature => f.write_str("signature verification failed"),
            TokenRejection::DisallowedAlgorithm(alg) => write!(f, "algorithm {} not allowed", alg),
            TokenRejection::MissingClaim(claim) => write!(f, "missing claim {}", claim),
            TokenRejection::UnusableKey(reason) => write!(f, "signing key unusable: {}", reason),
            TokenRejection::Other(reason) => f.write_str(reason),
        }
    }
}

/// Token verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Unknown signing key: {0}")]
    UnknownSigningKey(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(TokenRejection),

    #[error("Token has no email claim")]
    MissingEmailClaim,

    #[error("Email not verified by provider")]
    EmailNotVerified,

    #[error("Userinfo does not match token: {0}")]
    UserinfoMismatch(String),

    #[error("Signing keys unavailable: {0}")]
    KeyFetchFailed(String),
}

impl From<KeySetError> for OAuthError {
    fn from(e: KeySetError) -> Self {
        match e {
            KeySetError::UnknownKey { kid, .. } => OAuthError::UnknownSigningKey(kid),
            KeySetError::FetchFailed { .. } => OAuthError::KeyFetchFailed(e.to_string()),
        }
    }
}

/// ID token claims we read
#[derive(Debug, Clone, Deserialize)]
struct IdTokenClaims {
    sub: String,
    exp: i64,
    iat: i64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

// Apple sends email_verified as the string "true"/"false"
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        Some(BoolOrString::Bool(b)) => Some(b),
        Some(BoolOrString::Str(s)) => Some(s.eq_ignore_ascii_case("true")),
        None => None,
    })
}

/// Identity asserted by a cryptographically verified ID token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    provider: Provider,
    subject: String,
    email: String,
    email_verified: bool,
    display_name: Option<String>,
    avatar_url: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl VerifiedIdentity {
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Provider-scoped subject identifier
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Lowercased email
    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn email_verified(&self) -> bool {
        self.email_verified
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar_url.as_deref()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        provider: Provider,
        email: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            provider,
            subject: "test-subject".to_string(),
            email: email.to_ascii_lowercase(),
            email_verified: true,
            display_name: display_name.map(str::to_string),
            avatar_url: avatar_url.map(str::to_string),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        }
    }
}

/// Verifies provider ID tokens against cached signing keys
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    fetcher: Arc<dyn JsonFetcher>,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
}

impl TokenVerifier {
    pub fn new(
        keys: Arc<KeySetCache>,
        fetcher: Arc<dyn JsonFetcher>,
        clock: Arc<dyn Clock>,
        clock_skew: Duration,
    ) -> Self {
        Self {
            keys,
            fetcher,
            clock,
            clock_skew,
        }
    }

    /// Verify an ID token issued by `config.provider` for `expected_audience`
    pub async fn verify(
        &self,
        config: &ProviderConfig,
        id_token: &str,
        expected_audience: &str,
    ) -> Result<VerifiedIdentity, OAuthError> {
        // Rejects alg=none and garbage before any key or claim is touched
        let header = decode_header(id_token)
            .map_err(|e| OAuthError::MalformedToken(format!("Invalid header: {}", e)))?;

        let kid = header
            .kid
            .clone()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| OAuthError::MalformedToken("Token header has no key id".to_string()))?;

        if !config.algorithms.contains(&header.alg) {
            return Err(OAuthError::TokenInvalid(
                TokenRejection::DisallowedAlgorithm(format!("{:?}", header.alg)),
            ));
        }

        let jwk = self.keys.get_key(config, &kid).await?;
        let decoding_key = DecodingKey::from_jwk(&jwk).map_err(|e| {
            OAuthError::TokenInvalid(TokenRejection::UnusableKey(e.to_string()))
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(config.issuers.as_slice());
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // Time claims are checked below against the injected clock
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let claims = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(classify_jwt_error)?
            .claims;

        let now = self.clock.now();
        if claims.exp <= now.timestamp() {
            return Err(OAuthError::TokenInvalid(TokenRejection::Expired));
        }
        if claims.iat > (now + self.clock_skew).timestamp() {
            return Err(OAuthError::TokenInvalid(TokenRejection::IssuedInFuture));
        }

        let email = claims
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_ascii_lowercase)
            .ok_or(OAuthError::MissingEmailClaim)?;

        let email_verified = match (config.email_verification, claims.email_verified) {
            (EmailVerification::Required, Some(true)) => true,
            (EmailVerification::Required, _) => return Err(OAuthError::EmailNotVerified),
            (EmailVerification::IfAsserted, Some(false)) => {
                return Err(OAuthError::EmailNotVerified)
            }
            (EmailVerification::IfAsserted, _) => true,
        };

        Ok(VerifiedIdentity {
            provider: config.provider,
            subject: claims.sub,
            email,
            email_verified,
            display_name: non_empty(claims.name),
            avatar_url: non_empty(claims.picture),
            issued_at: timestamp(claims.iat),
            expires_at: timestamp(claims.exp),
        })
    }

    /// Best-effort check that an access token belongs to the same account
    ///
    /// Only a positive mismatch (or the provider refusing the access token)
    /// fails. Providers without a userinfo endpoint and transient errors
    /// are logged and let through.
    pub async fn cross_check_userinfo(
        &self,
        config: &ProviderConfig,
        access_token: &str,
        identity: &VerifiedIdentity,
    ) -> Result<(), OAuthError> {
        let Some(endpoint) = config.userinfo_endpoint.as_deref() else {
            tracing::debug!(provider = %config.provider, "Provider has no userinfo endpoint, skipping cross-check");
            return Ok(());
        };

        match self.fetcher.get_json(endpoint, Some(access_token)).await {
            Ok(body) => match userinfo_email(&body) {
                Some(email) if email.eq_ignore_ascii_case(identity.email()) => Ok(()),
                Some(_) => Err(OAuthError::UserinfoMismatch(
                    "userinfo email differs from ID token email".to_string(),
                )),
                None => {
                    tracing::warn!(provider = %config.provider, "Userinfo response has no email, skipping cross-check");
                    Ok(())
                }
            },
            Err(FetchError::Unauthorized(_)) => Err(OAuthError::UserinfoMismatch(
                "access token rejected by provider".to_string(),
            )),
            Err(e) => {
                tracing::warn!(provider = %config.provider, error = %e, "Userinfo cross-check unavailable");
                Ok(())
            }
        }
    }
}

fn classify_jwt_error(e: jsonwebtoken::errors::Error) -> OAuthError {
    let rejection = match e.kind() {
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::InvalidIssuer => TokenRejection::BadIssuer,
        ErrorKind::InvalidAudience => TokenRejection::BadAudience,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::InvalidAlgorithm => TokenRejection::DisallowedAlgorithm(e.to_string()),
        ErrorKind::MissingRequiredClaim(claim) => TokenRejection::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => return OAuthError::MalformedToken(e.to_string()),
        _ => TokenRejection::Other(e.to_string()),
    };
    OAuthError::TokenInvalid(rejection)
}

// Microsoft Graph reports the address as `mail` or `userPrincipalName`
fn userinfo_email(body: &serde_json::Value) -> Option<&str> {
    ["email", "mail", "userPrincipalName"]
        .iter()
        .filter_map(|field| body.get(*field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::KeySetCacheSettings;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use std::collections::HashMap;

    const PROVIDER_KEY: &str = include_str!("../../tests/fixtures/provider_key.pem");
    const ROGUE_KEY: &str = include_str!("../../tests/fixtures/rogue_key.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/provider_jwks.json");
    const AUDIENCE: &str = "marketplace-web";

    struct StaticFetcher {
        responses: HashMap<String, Result<serde_json::Value, FetchError>>,
    }

    #[async_trait]
    impl JsonFetcher for StaticFetcher {
        async fn get_json(
            &self,
            url: &str,
            _bearer: Option<&str>,
        ) -> Result<serde_json::Value, FetchError> {
            self.responses
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Timeout(url.to_string())))
        }
    }

    fn google() -> ProviderConfig {
        let mut config = ProviderConfig::builtin(Provider::Google);
        config.client_id = Some(AUDIENCE.to_string());
        config
    }

    fn verifier_with(
        userinfo: Option<Result<serde_json::Value, FetchError>>,
    ) -> (TokenVerifier, ManualClock) {
        let clock = ManualClock::starting_now();
        let config = google();
        let mut responses = HashMap::new();
        responses.insert(
            config.jwks_uri.clone(),
            Ok(serde_json::from_str(JWKS).unwrap()),
        );
        if let (Some(endpoint), Some(response)) = (config.userinfo_endpoint.clone(), userinfo) {
            responses.insert(endpoint, response);
        }
        let fetcher: Arc<dyn JsonFetcher> = Arc::new(StaticFetcher { responses });
        let keys = Arc::new(KeySetCache::new(
            fetcher.clone(),
            Arc::new(clock.clone()),
            KeySetCacheSettings::default(),
        ));
        let verifier = TokenVerifier::new(
            keys,
            fetcher,
            Arc::new(clock.clone()),
            Duration::seconds(DEFAULT_CLOCK_SKEW_SECONDS),
        );
        (verifier, clock)
    }

    fn claims(now: DateTime<Utc>) -> serde_json::Value {
        json!({
            "iss": "https://accounts.google.com",
            "aud": AUDIENCE,
            "sub": "1098",
            "iat": now.timestamp(),
            "exp": (now + Duration::hours(1)).timestamp(),
            "email": "Ada@Example.com",
            "email_verified": true,
            "name": "Ada Lovelace",
            "picture": "https://cdn.example.com/ada.png"
        })
    }

    fn sign(claims: &serde_json::Value, kid: &str, pem: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let (verifier, clock) = verifier_with(None);
        let token = sign(&claims(clock.now()), "provider-key-1", PROVIDER_KEY);

        let identity = verifier.verify(&google(), &token, AUDIENCE).await.unwrap();

        assert_eq!(identity.email(), "ada@example.com");
        assert_eq!(identity.display_name(), Some("Ada Lovelace"));
        assert_eq!(identity.provider(), Provider::Google);
        assert_eq!(identity.subject(), "1098");
        assert!(identity.email_verified());
    }

    #[tokio::test]
    async fn test_wrong_signing_key() {
        let (verifier, clock) = verifier_with(None);
        let token = sign(&claims(clock.now()), "provider-key-1", ROGUE_KEY);

        let err = verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err();
        assert_eq!(err, OAuthError::TokenInvalid(TokenRejection::BadSignature));
    }

    #[tokio::test]
    async fn test_unpublished_kid() {
        let (verifier, clock) = verifier_with(None);
        let token = sign(&claims(clock.now()), "rogue-key", ROGUE_KEY);

        let err = verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err();
        assert_eq!(err, OAuthError::UnknownSigningKey("rogue-key".to_string()));
    }

    #[tokio::test]
    async fn test_wrong_audience_and_issuer() {
        let (verifier, clock) = verifier_with(None);

        let token = sign(&claims(clock.now()), "provider-key-1", PROVIDER_KEY);
        let err = verifier.verify(&google(), &token, "other-app").await.unwrap_err();
        assert_eq!(err, OAuthError::TokenInvalid(TokenRejection::BadAudience));

        let mut forged = claims(clock.now());
        forged["iss"] = json!("https://evil.example.com");
        let token = sign(&forged, "provider-key-1", PROVIDER_KEY);
        let err = verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err();
        assert_eq!(err, OAuthError::TokenInvalid(TokenRejection::BadIssuer));
    }

    #[tokio::test]
    async fn test_time_claims() {
        let (verifier, clock) = verifier_with(None);
        let token = sign(&claims(clock.now()), "provider-key-1", PROVIDER_KEY);

        clock.advance(Duration::hours(2));
        let err = verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err();
        assert_eq!(err, OAuthError::TokenInvalid(TokenRejection::Expired));

        let mut future = claims(clock.now());
        future["iat"] = json!((clock.now() + Duration::minutes(6)).timestamp());
        let token = sign(&future, "provider-key-1", PROVIDER_KEY);
        let err = verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err();
        assert_eq!(err, OAuthError::TokenInvalid(TokenRejection::IssuedInFuture));

        let mut skewed = claims(clock.now());
        skewed["iat"] = json!((clock.now() + Duration::minutes(4)).timestamp());
        let token = sign(&skewed, "provider-key-1", PROVIDER_KEY);
        assert!(verifier.verify(&google(), &token, AUDIENCE).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_claims() {
        let (verifier, clock) = verifier_with(None);

        let mut no_email = claims(clock.now());
        no_email.as_object_mut().unwrap().remove("email");
        let token = sign(&no_email, "provider-key-1", PROVIDER_KEY);
        assert_eq!(
            verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err(),
            OAuthError::MissingEmailClaim
        );

        let mut unverified = claims(clock.now());
        unverified["email_verified"] = json!(false);
        let token = sign(&unverified, "provider-key-1", PROVIDER_KEY);
        assert_eq!(
            verifier.verify(&google(), &token, AUDIENCE).await.unwrap_err(),
            OAuthError::EmailNotVerified
        );
    }

    #[tokio::test]
    async fn test_header_without_kid_is_malformed() {
        let (verifier, clock) = verifier_with(None);
        let token = encode(
            &Header::new(Algorithm::RS256),
            &claims(clock.now()),
            &EncodingKey::from_rsa_pem(PROVIDER_KEY.as_bytes()).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            verifier.verify(&google(), &token, AUDIENCE).await,
            Err(OAuthError::MalformedToken(_))
        ));
    }

    #[tokio::test]
    async fn test_userinfo_cross_check() {
        let identity =
            VerifiedIdentity::for_tests(Provider::Google, "ada@example.com", None, None);

        let (verifier, _) = verifier_with(Some(Ok(json!({ "email": "ADA@example.com" }))));
        assert!(verifier
            .cross_check_userinfo(&google(), "at", &identity)
            .await
            .is_ok());

        let (verifier, _) = verifier_with(Some(Ok(json!({ "email": "eve@example.com" }))));
        assert!(matches!(
            verifier.cross_check_userinfo(&google(), "at", &identity).await,
            Err(OAuthError::UserinfoMismatch(_))
        ));

        let (verifier, _) = verifier_with(Some(Err(FetchError::Unauthorized(
            "userinfo".to_string(),
        ))));
        assert!(matches!(
            verifier.cross_check_userinfo(&google(), "at", &identity).await,
            Err(OAuthError::UserinfoMismatch(_))
        ));

        // Transient failures do not block login
        let (verifier, _) = verifier_with(None);
        assert!(verifier
            .cross_check_userinfo(&google(), "at", &identity)
            .await
            .is_ok());

        let apple = ProviderConfig::builtin(Provider::Apple);
        assert!(verifier
            .cross_check_userinfo(&apple, "at", &identity)
            .await
            .is_ok());
    }

    #[test]
    fn test_userinfo_email_fallbacks() {
        assert_eq!(
            userinfo_email(&json!({ "mail": "a@b.c" })),
            Some("a@b.c")
        );
        assert_eq!(
            userinfo_email(&json!({ "mail": "", "userPrincipalName": "u@b.c" })),
            Some("u@b.c")
        );
        assert_eq!(userinfo_email(&json!({ "id": 1 })), None);
    }

    #[test]
    fn test_flexible_email_verified() {
        let claims: IdTokenClaims = serde_json::from_value(json!({
            "sub": "s", "exp": 1, "iat": 1, "email_verified": "true"
        }))
        .unwrap();
        assert_eq!(claims.email_verified, Some(true));

        let claims: IdTokenClaims =
            serde_json::from_value(json!({ "sub": "s", "exp": 1, "iat": 1 })).unwrap();
        assert_eq!(claims.email_verified, None);
    }
}
