//! Marketplace auth server
//!
//! Serves wallet and social login over HTTP.

use anyhow::Context;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use marketplace_auth::auth::{
    AuthService, CredentialIssuer, HttpFetcher, InMemoryNonceStore, JsonFetcher, KeySetCache,
    NonceStore, ProviderRegistry, TokenVerifier,
};
use marketplace_auth::clock::{Clock, SystemClock};
use marketplace_auth::config::{Config, NonceBackend};
use marketplace_auth::routes;
use marketplace_auth::state::AppState;
use marketplace_auth::store::{PgNonceStore, PgUserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        database = %config.database_url_masked(),
        "Connecting to database..."
    );
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database connected and migrated");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let nonce_ttl = Duration::seconds(config.auth_nonce_ttl_seconds);

    let nonces: Arc<dyn NonceStore> = match config.nonce_backend {
        NonceBackend::Memory => Arc::new(InMemoryNonceStore::new(nonce_ttl, clock.clone())),
        NonceBackend::Postgres => {
            Arc::new(PgNonceStore::new(db_pool.clone(), nonce_ttl, clock.clone()))
        }
    };
    tracing::info!(backend = ?config.nonce_backend, "Nonce store ready");

    let fetcher: Arc<dyn JsonFetcher> = Arc::new(
        HttpFetcher::new(std::time::Duration::from_secs(config.http_timeout_seconds))
            .context("Failed to build HTTP client")?,
    );
    let key_cache = Arc::new(KeySetCache::new(
        fetcher.clone(),
        clock.clone(),
        config.key_set_cache_settings(),
    ));
    let verifier = TokenVerifier::new(
        key_cache,
        fetcher,
        clock,
        Duration::seconds(config.token_clock_skew_seconds),
    );

    let auth_service = Arc::new(AuthService::new(
        nonces,
        Arc::new(PgUserStore::new(db_pool.clone())),
        ProviderRegistry::new(config.provider_settings()),
        verifier,
        CredentialIssuer::new(
            config.jwt_secret.clone(),
            config.jwt_access_token_ttl_seconds,
            config.jwt_refresh_token_ttl_days,
        ),
    ));
    tracing::info!(providers = ?auth_service.enabled_providers(), "OAuth providers enabled");

    let app_state = AppState::new(auth_service, Some(db_pool));
    let app = routes::create_router(
        app_state,
        routes::cors_layer(config.cors_allowed_origins.as_deref()),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
