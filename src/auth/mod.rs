//! Authentication core for the marketplace
//!
//! Two independent trust paths:
//! - Wallet challenge-response with EIP-191 personal-message signatures
//! - OAuth ID tokens verified against the provider's published keys
//!
//! Both end in identity resolution and stateless session credentials.

pub mod crypto;
pub mod fetcher;
pub mod identity;
pub mod jwks;
pub mod jwt;
pub mod nonce;
pub mod oauth;
pub mod providers;
mod service;

pub use crypto::{normalize_address, recover_address, verify_wallet_signature, CryptoError};
pub use fetcher::{FetchError, HttpFetcher, JsonFetcher};
pub use identity::IdentityResolver;
pub use jwks::{KeySetCache, KeySetCacheSettings, KeySetError, StaleKeyPolicy};
pub use jwt::{verify_token, Claims, CredentialIssuer, JwtError, SessionCredential, TokenType};
pub use nonce::{InMemoryNonceStore, Nonce, NonceStore};
pub use oauth::{OAuthError, TokenRejection, TokenVerifier, VerifiedIdentity};
pub use providers::{Provider, ProviderConfig, ProviderRegistry, ProviderSettings};
pub use service::{challenge_message, AuthError, AuthService};
