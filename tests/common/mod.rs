//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marketplace_auth::auth::crypto::{address_from_key, personal_message_hash};
use marketplace_auth::auth::{
    AuthService, CredentialIssuer, FetchError, InMemoryNonceStore, JsonFetcher, KeySetCache,
    KeySetCacheSettings, Provider, ProviderConfig, ProviderRegistry, ProviderSettings,
    TokenVerifier,
};
use marketplace_auth::clock::ManualClock;
use marketplace_auth::store::MemoryUserStore;

pub const PROVIDER_KEY: &str = include_str!("../fixtures/provider_key.pem");
pub const ROGUE_KEY: &str = include_str!("../fixtures/rogue_key.pem");
pub const PROVIDER_JWKS: &str = include_str!("../fixtures/provider_jwks.json");
pub const ROTATED_JWKS: &str = include_str!("../fixtures/rotated_jwks.json");
pub const PROVIDER_KID: &str = "provider-key-1";
/// Published only in the rotated key set, signed with `ROGUE_KEY`
pub const ROTATED_KID: &str = "provider-key-2";

pub const GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const MICROSOFT_CLIENT_ID: &str = "microsoft-client-id";
pub const APPLE_CLIENT_ID: &str = "apple-client-id";
pub const JWT_SECRET: &str = "integration-test-secret";

/// Fetcher that answers from a table and counts calls per URL
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Result<Value, FetchError>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl FakeFetcher {
    pub fn respond(&self, url: &str, response: Result<Value, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JsonFetcher for FakeFetcher {
    async fn get_json(&self, url: &str, _bearer: Option<&str>) -> Result<Value, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

/// A fully wired service over in-memory stores
pub struct Harness {
    pub service: Arc<AuthService>,
    pub fetcher: Arc<FakeFetcher>,
    pub clock: ManualClock,
    pub users: Arc<MemoryUserStore>,
    pub nonces: Arc<InMemoryNonceStore>,
    pub registry: ProviderRegistry,
}

pub fn provider_settings() -> ProviderSettings {
    ProviderSettings {
        google_client_id: Some(GOOGLE_CLIENT_ID.to_string()),
        microsoft_client_id: Some(MICROSOFT_CLIENT_ID.to_string()),
        apple_client_id: Some(APPLE_CLIENT_ID.to_string()),
        microsoft_tenant_ids: vec![],
    }
}

pub fn harness() -> Harness {
    harness_with(KeySetCacheSettings::default())
}

pub fn harness_with(cache_settings: KeySetCacheSettings) -> Harness {
    let clock = ManualClock::starting_now();
    let fetcher = Arc::new(FakeFetcher::default());
    let registry = ProviderRegistry::new(provider_settings());

    let jwks: Value = serde_json::from_str(PROVIDER_JWKS).unwrap();
    for provider in Provider::ALL {
        fetcher.respond(&ProviderConfig::builtin(provider).jwks_uri, Ok(jwks.clone()));
    }

    let users = Arc::new(MemoryUserStore::new());
    let nonces = Arc::new(InMemoryNonceStore::new(
        Duration::seconds(300),
        Arc::new(clock.clone()),
    ));
    let keys = Arc::new(KeySetCache::new(
        fetcher.clone(),
        Arc::new(clock.clone()),
        cache_settings,
    ));
    let verifier = TokenVerifier::new(
        keys,
        fetcher.clone(),
        Arc::new(clock.clone()),
        Duration::seconds(300),
    );

    let service = Arc::new(AuthService::new(
        nonces.clone(),
        users.clone(),
        registry.clone(),
        verifier,
        CredentialIssuer::new(JWT_SECRET.to_string(), 900, 7),
    ));

    Harness {
        service,
        fetcher,
        clock,
        users,
        nonces,
        registry,
    }
}

/// Standard Google ID token claims valid at `now`
pub fn google_claims(now: DateTime<Utc>) -> Value {
    json!({
        "iss": "https://accounts.google.com",
        "aud": GOOGLE_CLIENT_ID,
        "sub": "google-subject-1",
        "iat": now.timestamp(),
        "exp": (now + Duration::hours(1)).timestamp(),
        "email": "ada@example.com",
        "email_verified": true,
        "name": "Ada Lovelace",
        "picture": "https://cdn.example.com/ada.png"
    })
}

/// Sign claims as RS256 with the given kid and PEM key
pub fn mint_token(claims: &Value, kid: &str, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// Sign claims with the published provider key
pub fn provider_token(claims: &Value) -> String {
    mint_token(claims, PROVIDER_KID, PROVIDER_KEY)
}

/// A deterministic wallet
pub struct TestWallet {
    key: SigningKey,
}

impl TestWallet {
    pub fn new(seed: u8) -> Self {
        Self {
            key: SigningKey::from_slice(&[seed; 32]).unwrap(),
        }
    }

    /// Lowercase `0x` address
    pub fn address(&self) -> String {
        address_from_key(self.key.verifying_key())
    }

    /// Checksum-style mixed case, as wallets display it
    pub fn display_address(&self) -> String {
        let address = self.address();
        let mixed: String = address[2..]
            .chars()
            .enumerate()
            .map(|(i, c)| if i % 2 == 0 { c.to_ascii_uppercase() } else { c })
            .collect();
        format!("0x{}", mixed)
    }

    /// `personal_sign` over `message`, 65 bytes hex with v in {27, 28}
    pub fn sign(&self, message: &str) -> String {
        let prehash = personal_message_hash(message);
        let (sig, recid) = self.key.sign_prehash_recoverable(&prehash).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }
}
