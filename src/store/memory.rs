//! In-process user store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewUser, StoreError, UniqueField, UserFieldsUpdate, UserStore};
use crate::models::UserRecord;

/// User store backed by a map, with the same uniqueness rules as Postgres
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_wallet(&self, wallet_address: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.wallet_address.as_deref() == Some(wallet_address))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.lock().await;

        for existing in users.values() {
            if user.wallet_address.is_some() && existing.wallet_address == user.wallet_address {
                return Err(StoreError::Conflict(UniqueField::Wallet));
            }
            if user.email.is_some() && existing.email == user.email {
                return Err(StoreError::Conflict(UniqueField::Email));
            }
            if existing.username == user.username {
                return Err(StoreError::Conflict(UniqueField::Username));
            }
        }

        let now = Utc::now();
        let record = UserRecord {
            id: Uuid::new_v4(),
            username: user.username,
            wallet_address: user.wallet_address,
            email: user.email,
            display_name: user.display_name,
            avatar: user.avatar,
            role: user.role,
            email_verified: user.email_verified,
            wallet_verified: user.wallet_verified,
            created_at: now,
            updated_at: now,
        };
        users.insert(record.id, record.clone());

        Ok(record)
    }

    async fn update_fields(
        &self,
        id: Uuid,
        update: UserFieldsUpdate,
    ) -> Result<UserRecord, StoreError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(display_name) = update.display_name {
            user.display_name = display_name;
        }
        if let Some(avatar) = update.avatar {
            user.avatar = Some(avatar);
        }
        if let Some(email_verified) = update.email_verified {
            user.email_verified = email_verified;
        }
        if let Some(wallet_verified) = update.wallet_verified {
            user.wallet_verified = wallet_verified;
        }
        user.updated_at = Utc::now();

        Ok(user.clone())
    }
}
