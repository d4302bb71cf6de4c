//! Configuration management
//!
//! Loads and validates configuration from environment variables, with
//! support for different environments (development, staging, production).

use chrono::Duration;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::auth::{KeySetCacheSettings, ProviderSettings, StaleKeyPolicy};

const DEV_JWT_SECRET: &str = "development-secret-change-in-production";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),

    #[error("Invalid port number: {0}")]
    InvalidPort(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Where wallet challenges live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceBackend {
    /// Process memory; single instance only
    #[default]
    Memory,
    /// `auth_nonces` table; shared across instances
    Postgres,
}

impl FromStr for NonceBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(NonceBackend::Memory),
            "postgres" => Ok(NonceBackend::Postgres),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid NONCE_BACKEND: '{}'. Expected: memory or postgres",
                s
            ))),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub environment: Environment,

    pub port: u16,

    pub db_max_connections: u32,

    /// Comma-separated CORS origins
    pub cors_allowed_origins: Option<String>,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// JWT secret for session token signing
    pub jwt_secret: String,

    /// Access token TTL in seconds (default: 900 = 15 minutes)
    pub jwt_access_token_ttl_seconds: i64,

    /// Refresh token TTL in days (default: 7)
    pub jwt_refresh_token_ttl_days: i64,

    /// Wallet challenge TTL in seconds (default: 300 = 5 minutes)
    pub auth_nonce_ttl_seconds: i64,

    pub nonce_backend: NonceBackend,

    pub google_client_id: Option<String>,
    pub microsoft_client_id: Option<String>,
    pub apple_client_id: Option<String>,
    pub microsoft_tenant_ids: Vec<String>,

    /// Provider key set TTL (default: 3600)
    pub jwks_cache_ttl_seconds: i64,

    /// How long an expired key set may still be served when refresh fails; 0 disables
    pub jwks_stale_grace_seconds: i64,

    /// Cooldown between forced key set refreshes on unknown key ids
    pub jwks_min_refresh_seconds: i64,

    /// Timeout for provider HTTP calls
    pub http_timeout_seconds: u64,

    /// Allowed provider clock drift for `iat`
    pub token_clock_skew_seconds: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::from_str(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort("PORT must be a valid number".to_string()))?;

        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 5u32);

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string());
        if environment.is_production() && jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::InvalidValue(
                "JWT_SECRET must be set in production".to_string(),
            ));
        }

        let nonce_backend = env::var("NONCE_BACKEND")
            .map(|s| NonceBackend::from_str(&s))
            .unwrap_or(Ok(NonceBackend::Memory))?;

        let microsoft_tenant_ids = env::var("OAUTH_MICROSOFT_TENANT_IDS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        Ok(Config {
            database_url,
            environment,
            port,
            db_max_connections,
            cors_allowed_origins,
            log_level,
            jwt_secret,
            jwt_access_token_ttl_seconds: positive_or("JWT_ACCESS_TOKEN_TTL_SECONDS", 900)?,
            jwt_refresh_token_ttl_days: positive_or("JWT_REFRESH_TOKEN_TTL_DAYS", 7)?,
            auth_nonce_ttl_seconds: positive_or("AUTH_NONCE_TTL_SECONDS", 300)?,
            nonce_backend,
            google_client_id: non_empty_var("OAUTH_GOOGLE_CLIENT_ID"),
            microsoft_client_id: non_empty_var("OAUTH_MICROSOFT_CLIENT_ID"),
            apple_client_id: non_empty_var("OAUTH_APPLE_CLIENT_ID"),
            microsoft_tenant_ids,
            jwks_cache_ttl_seconds: positive_or("JWKS_CACHE_TTL_SECONDS", 3600)?,
            jwks_stale_grace_seconds: parse_or("JWKS_STALE_GRACE_SECONDS", 900),
            jwks_min_refresh_seconds: parse_or("JWKS_MIN_REFRESH_SECONDS", 60),
            http_timeout_seconds: positive_or("HTTP_TIMEOUT_SECONDS", 10)?.unsigned_abs(),
            token_clock_skew_seconds: positive_or("TOKEN_CLOCK_SKEW_SECONDS", 300)?,
        })
    }

    /// Get database URL with the password masked for logging
    pub fn database_url_masked(&self) -> String {
        if let Some(at_pos) = self.database_url.find('@') {
            if let Some(colon_pos) = self.database_url[..at_pos].rfind(':') {
                let prefix = &self.database_url[..colon_pos + 1];
                let suffix = &self.database_url[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
        self.database_url.clone()
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            google_client_id: self.google_client_id.clone(),
            microsoft_client_id: self.microsoft_client_id.clone(),
            apple_client_id: self.apple_client_id.clone(),
            microsoft_tenant_ids: self.microsoft_tenant_ids.clone(),
        }
    }

    pub fn key_set_cache_settings(&self) -> KeySetCacheSettings {
        let stale_policy = if self.jwks_stale_grace_seconds > 0 {
            StaleKeyPolicy::ServeStale {
                grace: Duration::seconds(self.jwks_stale_grace_seconds),
            }
        } else {
            StaleKeyPolicy::Reject
        };

        KeySetCacheSettings {
            ttl: Duration::seconds(self.jwks_cache_ttl_seconds),
            stale_policy,
            min_refresh_interval: Duration::seconds(self.jwks_min_refresh_seconds),
        }
    }
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Durations and TTLs: unset falls back to `default`, anything else must be a positive integer
fn positive_or(name: &str, default: i64) -> Result<i64, ConfigError> {
    parse_positive(name, env::var(name).ok().as_deref(), default)
}

fn parse_positive(name: &str, raw: Option<&str>, default: i64) -> Result<i64, ConfigError> {
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    match raw.parse::<i64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a positive integer, got {:?}",
            name, raw
        ))),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
