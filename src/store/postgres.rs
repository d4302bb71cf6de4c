//! Postgres-backed stores

use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::{NewUser, StoreError, UserFieldsUpdate, UserStore};
use crate::auth::nonce::{generate_nonce_value, Nonce, NonceStore};
use crate::clock::Clock;
use crate::models::UserRecord;

const USER_COLUMNS: &str = "id, username, wallet_address, email, display_name, avatar, role, \
     email_verified, wallet_verified, created_at, updated_at";

/// User store over the `users` table
#[derive(Clone)]
pub struct PgUserStore {
    db_pool: PgPool,
}

impl PgUserStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(user)
    }

    async fn find_by_wallet(&self, wallet_address: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE wallet_address = $1",
            USER_COLUMNS
        ))
        .bind(wallet_address)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let record = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id, username, wallet_address, email, display_name, avatar, role,
                               email_verified, wallet_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.wallet_address)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.avatar)
        .bind(user.role)
        .bind(user.email_verified)
        .bind(user.wallet_verified)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(record)
    }

    async fn update_fields(
        &self,
        id: Uuid,
        update: UserFieldsUpdate,
    ) -> Result<UserRecord, StoreError> {
        sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET display_name = COALESCE($2, display_name),
                avatar = COALESCE($3, avatar),
                email_verified = COALESCE($4, email_verified),
                wallet_verified = COALESCE($5, wallet_verified),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(id)
        .bind(&update.display_name)
        .bind(&update.avatar)
        .bind(update.email_verified)
        .bind(update.wallet_verified)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(StoreError::NotFound(id))
    }
}

/// Nonce store over the `auth_nonces` table
///
/// The table is keyed by wallet address, so an upsert gives last-writer-wins
/// issuance and a conditional `DELETE ... RETURNING` gives an atomic
/// consume under the row lock.
#[derive(Clone)]
pub struct PgNonceStore {
    db_pool: PgPool,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PgNonceStore {
    pub fn new(db_pool: PgPool, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            db_pool,
            ttl,
            clock,
        }
    }
}

#[async_trait]
impl NonceStore for PgNonceStore {
    async fn issue(&self, wallet_address: &str) -> Result<Nonce, StoreError> {
        let now = self.clock.now();
        let nonce = Nonce {
            wallet_address: wallet_address.to_string(),
            value: generate_nonce_value(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        sqlx::query("DELETE FROM auth_nonces WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db_pool)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO auth_nonces (wallet_address, nonce, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (wallet_address)
            DO UPDATE SET nonce = EXCLUDED.nonce,
                          issued_at = EXCLUDED.issued_at,
                          expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&nonce.wallet_address)
        .bind(&nonce.value)
        .bind(nonce.issued_at)
        .bind(nonce.expires_at)
        .execute(&self.db_pool)
        .await?;

        Ok(nonce)
    }

    async fn consume(&self, wallet_address: &str, presented: &str) -> Result<bool, StoreError> {
        let consumed: Option<String> = sqlx::query_scalar(
            r#"
            DELETE FROM auth_nonces
            WHERE wallet_address = $1 AND nonce = $2 AND expires_at > $3
            RETURNING wallet_address
            "#,
        )
        .bind(wallet_address)
        .bind(presented)
        .bind(self.clock.now())
        .fetch_optional(&self.db_pool)
        .await?;

        Ok(consumed.is_some())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
