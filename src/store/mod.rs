//! Identity store and persistent nonce store adapters
//!
//! The auth core only needs narrow find/create/update operations on user
//! records. Uniqueness of wallet address, email and username is enforced
//! by the store; a violation comes back as [`StoreError::Conflict`] so
//! callers can retry the create as a fetch.

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::{PgNonceStore, PgUserStore};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{UserRecord, UserRole};

/// Unique columns of the user table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Wallet,
    Email,
    Username,
}

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated on {0:?}")]
    Conflict(UniqueField),

    #[error("User not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                let field = match db_err.constraint() {
                    Some(c) if c.contains("wallet") => Some(UniqueField::Wallet),
                    Some(c) if c.contains("email") => Some(UniqueField::Email),
                    Some(c) if c.contains("username") => Some(UniqueField::Username),
                    _ => None,
                };
                if let Some(field) = field {
                    return StoreError::Conflict(field);
                }
            }
        }
        StoreError::Database(e.to_string())
    }
}

/// Fields for a new user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub wallet_address: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub email_verified: bool,
    pub wallet_verified: bool,
}

/// Selective update; `None` leaves a column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFieldsUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub email_verified: Option<bool>,
    pub wallet_verified: Option<bool>,
}

impl UserFieldsUpdate {
    pub fn is_empty(&self) -> bool {
        self == &UserFieldsUpdate::default()
    }
}

/// User identity store
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Look up by lowercase wallet address
    async fn find_by_wallet(&self, wallet_address: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Look up by lowercase email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert a user, failing with `Conflict` on any unique violation
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn update_fields(
        &self,
        id: Uuid,
        update: UserFieldsUpdate,
    ) -> Result<UserRecord, StoreError>;
}
