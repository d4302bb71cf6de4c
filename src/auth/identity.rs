//! Mapping verified wallets and OAuth identities to user records

use rand::RngCore;
use std::sync::Arc;

use super::oauth::VerifiedIdentity;
use crate::models::{UserRecord, UserRole};
use crate::store::{NewUser, StoreError, UniqueField, UserFieldsUpdate, UserStore};

const MAX_CREATE_ATTEMPTS: usize = 5;
const USERNAME_BASE_MAX_LEN: usize = 24;

/// Find-or-create over the identity store
///
/// Creation races are settled by the store's unique constraints: a
/// conflict on the lookup key means another request created the user
/// first, so the create is retried as a fetch. A conflict on the username
/// retries with a random suffix.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Resolve a verified, lowercased wallet address
    pub async fn resolve_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<(UserRecord, bool), StoreError> {
        let base = wallet_username(wallet_address);
        let mut last_err = StoreError::Conflict(UniqueField::Username);

        for attempt in 0..MAX_CREATE_ATTEMPTS {
            if let Some(user) = self.store.find_by_wallet(wallet_address).await? {
                let user = self.mark_wallet_verified(user).await?;
                return Ok((user, false));
            }

            let new_user = NewUser {
                username: candidate_username(&base, attempt),
                wallet_address: Some(wallet_address.to_string()),
                email: None,
                display_name: wallet_handle(wallet_address),
                avatar: None,
                role: UserRole::default(),
                email_verified: false,
                wallet_verified: true,
            };

            match self.store.create(new_user).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, wallet = %wallet_address, "Created user for wallet");
                    return Ok((user, true));
                }
                Err(StoreError::Conflict(field)) => {
                    tracing::debug!(wallet = %wallet_address, ?field, attempt, "User creation conflicted, retrying");
                    last_err = StoreError::Conflict(field);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    /// Resolve an identity asserted by a verified provider token
    pub async fn resolve_by_verified_identity(
        &self,
        identity: &VerifiedIdentity,
    ) -> Result<(UserRecord, bool), StoreError> {
        let email = identity.email();
        let base = email_username(email);
        let mut last_err = StoreError::Conflict(UniqueField::Username);

        for attempt in 0..MAX_CREATE_ATTEMPTS {
            if let Some(user) = self.store.find_by_email(email).await? {
                let user = self.refresh_profile(user, identity).await?;
                return Ok((user, false));
            }

            let new_user = NewUser {
                username: candidate_username(&base, attempt),
                wallet_address: None,
                email: Some(email.to_string()),
                display_name: identity
                    .display_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| base.clone()),
                avatar: identity.avatar_url().map(str::to_string),
                role: UserRole::default(),
                email_verified: true,
                wallet_verified: false,
            };

            match self.store.create(new_user).await {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, provider = %identity.provider(), "Created user for verified identity");
                    return Ok((user, true));
                }
                Err(StoreError::Conflict(field)) => {
                    tracing::debug!(provider = %identity.provider(), ?field, attempt, "User creation conflicted, retrying");
                    last_err = StoreError::Conflict(field);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    async fn mark_wallet_verified(&self, user: UserRecord) -> Result<UserRecord, StoreError> {
        if user.wallet_verified {
            return Ok(user);
        }
        let update = UserFieldsUpdate {
            wallet_verified: Some(true),
            ..Default::default()
        };
        self.store.update_fields(user.id, update).await
    }

    async fn refresh_profile(
        &self,
        user: UserRecord,
        identity: &VerifiedIdentity,
    ) -> Result<UserRecord, StoreError> {
        let update = profile_update(&user, identity);
        if update.is_empty() {
            return Ok(user);
        }
        self.store.update_fields(user.id, update).await
    }
}

/// Changes a verified identity brings to an existing record
///
/// Profile fields only move to non-empty, different values and the
/// verification flag only ever flips to true.
fn profile_update(user: &UserRecord, identity: &VerifiedIdentity) -> UserFieldsUpdate {
    UserFieldsUpdate {
        display_name: identity
            .display_name()
            .filter(|name| *name != user.display_name)
            .map(str::to_string),
        avatar: identity
            .avatar_url()
            .filter(|url| user.avatar.as_deref() != Some(*url))
            .map(str::to_string),
        email_verified: (!user.email_verified).then_some(true),
        wallet_verified: None,
    }
}

fn candidate_username(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let mut suffix = [0u8; 3];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{}_{}", base, hex::encode(suffix))
}

fn wallet_username(wallet_address: &str) -> String {
    let hex = wallet_address.trim_start_matches("0x");
    format!("user_{}", &hex[..hex.len().min(8)])
}

// "0x7e5f...5bdf"
fn wallet_handle(wallet_address: &str) -> String {
    if wallet_address.len() <= 10 {
        return wallet_address.to_string();
    }
    format!(
        "{}...{}",
        &wallet_address[..6],
        &wallet_address[wallet_address.len() - 4..]
    )
}

fn email_username(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let cleaned: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .take(USERNAME_BASE_MAX_LEN)
        .collect::<String>()
        .to_ascii_lowercase();

    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}
