//! Provider signing-key cache
//!
//! Key sets are fetched lazily on miss or expiry and kept per provider.
//! A failed refresh never evicts what is already cached.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::Jwk;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::fetcher::JsonFetcher;
use super::providers::{Provider, ProviderConfig};
use crate::clock::Clock;

/// Default key-set lifetime
pub const DEFAULT_JWKS_TTL_SECONDS: i64 = 3600;

/// Key-set errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeySetError {
    #[error("Failed to fetch signing keys for {provider}: {reason}")]
    FetchFailed { provider: Provider, reason: String },

    #[error("No signing key {kid} published by {provider}")]
    UnknownKey { provider: Provider, kid: String },
}

/// What to do when a refresh fails but an expired key set is cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleKeyPolicy {
    /// Fail the request with `FetchFailed`
    Reject,
    /// Keep serving the old keys for up to `grace` past their expiry
    ServeStale { grace: Duration },
}

/// Cache tuning
#[derive(Debug, Clone, Copy)]
pub struct KeySetCacheSettings {
    pub ttl: Duration,
    pub stale_policy: StaleKeyPolicy,
    /// Minimum age before an unknown `kid` forces a refetch
    pub min_refresh_interval: Duration,
}

impl Default for KeySetCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(DEFAULT_JWKS_TTL_SECONDS),
            stale_policy: StaleKeyPolicy::ServeStale {
                grace: Duration::minutes(15),
            },
            min_refresh_interval: Duration::seconds(60),
        }
    }
}

/// A provider's published keys
#[derive(Debug, Clone)]
pub struct CachedKeySet {
    pub provider: Provider,
    pub keys: HashMap<String, Jwk>,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedKeySet {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.fetched_at + self.ttl
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }
}

/// Shared per-provider key cache
pub struct KeySetCache {
    fetcher: Arc<dyn JsonFetcher>,
    clock: Arc<dyn Clock>,
    settings: KeySetCacheSettings,
    entries: RwLock<HashMap<Provider, Arc<CachedKeySet>>>,
    // One in-flight fetch per provider; guards the time of the last attempt
    refresh_locks: HashMap<Provider, Mutex<Option<DateTime<Utc>>>>,
}

impl KeySetCache {
    pub fn new(
        fetcher: Arc<dyn JsonFetcher>,
        clock: Arc<dyn Clock>,
        settings: KeySetCacheSettings,
    ) -> Self {
        Self {
            fetcher,
            clock,
            settings,
            entries: RwLock::new(HashMap::new()),
            refresh_locks: Provider::ALL
                .into_iter()
                .map(|p| (p, Mutex::new(None)))
                .collect(),
        }
    }

    /// Currently cached key set, fresh or not
    pub async fn cached(&self, provider: Provider) -> Option<Arc<CachedKeySet>> {
        self.entries.read().await.get(&provider).cloned()
    }

    /// Return the provider's keys, fetching on miss or expiry
    pub async fn get_keys(&self, config: &ProviderConfig) -> Result<Arc<CachedKeySet>, KeySetError> {
        let now = self.clock.now();
        if let Some(entry) = self.cached(config.provider).await {
            if entry.is_fresh(now) {
                return Ok(entry);
            }
        }

        self.refresh(config, false).await
    }

    /// Look up one signing key by id
    ///
    /// An unknown `kid` against a key set older than the refresh interval
    /// triggers one refetch, which picks up provider key rotation.
    pub async fn get_key(&self, config: &ProviderConfig, kid: &str) -> Result<Jwk, KeySetError> {
        let key_set = self.get_keys(config).await?;
        if let Some(jwk) = key_set.find(kid) {
            return Ok(jwk.clone());
        }

        let now = self.clock.now();
        if now - key_set.fetched_at >= self.settings.min_refresh_interval {
            tracing::info!(
                provider = %config.provider,
                kid = %kid,
                "Unknown signing key, refreshing key set"
            );
            match self.refresh(config, true).await {
                Ok(refreshed) => {
                    if let Some(jwk) = refreshed.find(kid) {
                        return Ok(jwk.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(provider = %config.provider, error = %e, "Key set refresh failed");
                }
            }
        }

        Err(KeySetError::UnknownKey {
            provider: config.provider,
            kid: kid.to_string(),
        })
    }

    async fn refresh(
        &self,
        config: &ProviderConfig,
        force: bool,
    ) -> Result<Arc<CachedKeySet>, KeySetError> {
        let provider = config.provider;
        let mut last_attempt = match self.refresh_locks.get(&provider) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        // Another task may have refreshed while we waited
        let now = self.clock.now();
        let previous = self.cached(provider).await;
        if let Some(entry) = &previous {
            let fetched_recently = now - entry.fetched_at < self.settings.min_refresh_interval;
            if entry.is_fresh(now) && (!force || fetched_recently) {
                return Ok(entry.clone());
            }
        }

        // A failed attempt within the cooldown answers for everyone queued behind it
        if let Some(slot) = last_attempt.as_deref_mut() {
            if let Some(at) = *slot {
                if now - at < self.settings.min_refresh_interval {
                    return self.fallback(
                        provider,
                        previous,
                        format!("refresh attempted at {}, waiting out cooldown", at),
                    );
                }
            }
            *slot = Some(now);
        }

        match self.fetch(config).await {
            Ok(keys) => {
                let entry = Arc::new(CachedKeySet {
                    provider,
                    keys,
                    fetched_at: self.clock.now(),
                    ttl: self.settings.ttl,
                });
                self.entries.write().await.insert(provider, entry.clone());
                tracing::debug!(
                    provider = %provider,
                    keys = entry.keys.len(),
                    "Signing key set refreshed"
                );
                Ok(entry)
            }
            Err(reason) => self.fallback(provider, previous, reason),
        }
    }

    fn fallback(
        &self,
        provider: Provider,
        previous: Option<Arc<CachedKeySet>>,
        reason: String,
    ) -> Result<Arc<CachedKeySet>, KeySetError> {
        let now = self.clock.now();

        if let Some(entry) = previous {
            if entry.is_fresh(now) {
                tracing::warn!(provider = %provider, reason = %reason, "Key refresh failed, keeping cached keys");
                return Ok(entry);
            }
            if let StaleKeyPolicy::ServeStale { grace } = self.settings.stale_policy {
                if now < entry.fetched_at + entry.ttl + grace {
                    tracing::warn!(
                        provider = %provider,
                        reason = %reason,
                        fetched_at = %entry.fetched_at,
                        "Key refresh failed, serving stale keys within grace period"
                    );
                    return Ok(entry);
                }
            }
        }

        tracing::error!(provider = %provider, reason = %reason, "Signing keys unavailable");
        Err(KeySetError::FetchFailed { provider, reason })
    }

    async fn fetch(&self, config: &ProviderConfig) -> Result<HashMap<String, Jwk>, String> {
        let body = self
            .fetcher
            .get_json(&config.jwks_uri, None)
            .await
            .map_err(|e| e.to_string())?;

        parse_key_set(&body)
    }
}

/// Parse a JWKS document into keys indexed by `kid`
///
/// Entries without a `kid` or of a key type we cannot use are skipped.
pub fn parse_key_set(body: &serde_json::Value) -> Result<HashMap<String, Jwk>, String> {
    let entries = body
        .get("keys")
        .and_then(|k| k.as_array())
        .ok_or_else(|| "Key set has no keys array".to_string())?;

    let mut keys = HashMap::new();
    for entry in entries {
        match serde_json::from_value::<Jwk>(entry.clone()) {
            Ok(jwk) => {
                if let Some(kid) = jwk.common.key_id.clone() {
                    keys.insert(kid, jwk);
                }
            }
            Err(e) => tracing::debug!(error = %e, "Skipping unusable key set entry"),
        }
    }

    if keys.is_empty() {
        return Err("Key set contains no usable keys".to_string());
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::fetcher::FetchError;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Option<std::time::Duration>,
        body: serde_json::Value,
    }

    impl CountingFetcher {
        fn new(body: serde_json::Value) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                delay: None,
                body,
            }
        }
    }

    #[async_trait]
    impl JsonFetcher for CountingFetcher {
        async fn get_json(
            &self,
            url: &str,
            _bearer: Option<&str>,
        ) -> Result<serde_json::Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(FetchError::Timeout(url.to_string()));
            }
            Ok(self.body.clone())
        }
    }

    fn key_set() -> serde_json::Value {
        json!({
            "keys": [
                { "kty": "RSA", "kid": "k1", "use": "sig", "alg": "RS256", "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw", "e": "AQAB" },
                { "kty": "unsupported", "kid": "k2" }
            ]
        })
    }

    fn config() -> ProviderConfig {
        let mut config = ProviderConfig::builtin(Provider::Google);
        config.jwks_uri = "https://keys.test/google".to_string();
        config
    }

    fn cache(
        fetcher: Arc<CountingFetcher>,
        clock: &ManualClock,
        stale_policy: StaleKeyPolicy,
    ) -> KeySetCache {
        KeySetCache::new(
            fetcher,
            Arc::new(clock.clone()),
            KeySetCacheSettings {
                ttl: Duration::seconds(3600),
                stale_policy,
                min_refresh_interval: Duration::seconds(60),
            },
        )
    }

    #[test]
    fn test_parse_key_set_skips_unusable_entries() {
        let keys = parse_key_set(&key_set()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("k1"));
    }

    #[test]
    fn test_parse_key_set_rejects_empty() {
        assert!(parse_key_set(&json!({ "keys": [] })).is_err());
        assert!(parse_key_set(&json!({ "nope": 1 })).is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        let cache = cache(fetcher.clone(), &clock, StaleKeyPolicy::Reject);

        cache.get_keys(&config()).await.unwrap();
        clock.advance(Duration::seconds(3599));
        cache.get_keys(&config()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiry_triggers_refetch() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        let cache = cache(fetcher.clone(), &clock, StaleKeyPolicy::Reject);

        cache.get_keys(&config()).await.unwrap();
        clock.advance(Duration::seconds(3600));
        cache.get_keys(&config()).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_without_cache() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        fetcher.failing.store(true, Ordering::SeqCst);
        let cache = cache(fetcher, &clock, StaleKeyPolicy::Reject);

        let result = cache.get_keys(&config()).await;
        assert!(matches!(result, Err(KeySetError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn test_stale_keys_served_within_grace() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        let cache = cache(
            fetcher.clone(),
            &clock,
            StaleKeyPolicy::ServeStale {
                grace: Duration::seconds(600),
            },
        );

        cache.get_keys(&config()).await.unwrap();
        fetcher.failing.store(true, Ordering::SeqCst);

        clock.advance(Duration::seconds(3700));
        assert!(cache.get_keys(&config()).await.is_ok());

        clock.advance(Duration::seconds(600));
        assert!(matches!(
            cache.get_keys(&config()).await,
            Err(KeySetError::FetchFailed { .. })
        ));

        // Failed refreshes never evict
        assert!(cache.cached(Provider::Google).await.is_some());
    }

    #[tokio::test]
    async fn test_reject_policy_fails_after_expiry() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        let cache = cache(fetcher.clone(), &clock, StaleKeyPolicy::Reject);

        cache.get_keys(&config()).await.unwrap();
        fetcher.failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::seconds(3601));

        assert!(cache.get_keys(&config()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_outage_shares_one_failed_refresh() {
        let clock = ManualClock::starting_now();
        let mut slow = CountingFetcher::new(key_set());
        slow.delay = Some(std::time::Duration::from_millis(200));
        let fetcher = Arc::new(slow);
        let cache = Arc::new(cache(
            fetcher.clone(),
            &clock,
            StaleKeyPolicy::ServeStale {
                grace: Duration::seconds(900),
            },
        ));

        cache.get_keys(&config()).await.unwrap();
        fetcher.failing.store(true, Ordering::SeqCst);
        clock.advance(Duration::seconds(3601));

        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_keys(&config()).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        // Unknown kid during the outage does not fetch again either
        assert!(cache.get_key(&config(), "rotated").await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        // Cooldown over: the next caller tries the network again
        clock.advance(Duration::seconds(61));
        assert!(cache.get_keys(&config()).await.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_kid_refresh_is_rate_limited() {
        let clock = ManualClock::starting_now();
        let fetcher = Arc::new(CountingFetcher::new(key_set()));
        let cache = cache(fetcher.clone(), &clock, StaleKeyPolicy::Reject);

        let err = cache.get_key(&config(), "rotated").await.unwrap_err();
        assert_eq!(
            err,
            KeySetError::UnknownKey {
                provider: Provider::Google,
                kid: "rotated".to_string()
            }
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(61));
        assert!(cache.get_key(&config(), "rotated").await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        assert!(cache.get_key(&config(), "k1").await.is_ok());
    }
}
