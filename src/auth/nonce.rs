//! Single-use wallet challenges
//!
//! At most one live nonce exists per wallet address. Issuing a new one
//! replaces the previous one; a successful consume removes it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::store::StoreError;

/// Default challenge lifetime
pub const DEFAULT_NONCE_TTL_SECONDS: i64 = 300;

/// An issued challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    pub wallet_address: String,
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Nonce {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storage for wallet challenges
///
/// Implementations must make `consume` atomic per wallet address: when
/// several callers present the matching value concurrently, exactly one
/// of them gets `true`.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Issue a fresh nonce for `wallet_address`, replacing any live one
    async fn issue(&self, wallet_address: &str) -> Result<Nonce, StoreError>;

    /// Consume the nonce for `wallet_address` if it matches `presented`
    ///
    /// A match deletes the entry. A mismatch leaves it in place so the
    /// legitimate holder can still use it before it expires. Absent and
    /// expired entries always report `false`.
    async fn consume(&self, wallet_address: &str, presented: &str) -> Result<bool, StoreError>;

    /// Challenge lifetime
    fn ttl(&self) -> Duration;
}

/// Generate a nonce value with 32 bytes of entropy
pub fn generate_nonce_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Process-local nonce store
///
/// A single mutex over the map serializes every issue and consume, which
/// gives the per-address exclusion `consume` requires.
pub struct InMemoryNonceStore {
    entries: Mutex<HashMap<String, Nonce>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryNonceStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Number of live (unexpired) entries
    pub async fn live_count(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|n| !n.is_expired(now)).count()
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn issue(&self, wallet_address: &str) -> Result<Nonce, StoreError> {
        let now = self.clock.now();
        let nonce = Nonce {
            wallet_address: wallet_address.to_string(),
            value: generate_nonce_value(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let mut entries = self.entries.lock().await;
        entries.retain(|_, existing| !existing.is_expired(now));
        entries.insert(wallet_address.to_string(), nonce.clone());

        Ok(nonce)
    }

    async fn consume(&self, wallet_address: &str, presented: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let Some(stored) = entries.get(wallet_address) else {
            return Ok(false);
        };

        if stored.is_expired(now) {
            entries.remove(wallet_address);
            return Ok(false);
        }

        if !constant_time_eq(stored.value.as_bytes(), presented.as_bytes()) {
            return Ok(false);
        }

        entries.remove(wallet_address);
        Ok(true)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
