// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Entitlement store.
//!
//! Repositories for users, licenses, plans and subscriptions, plus a
//! transaction handle for multi-entity writes. Two backends implement the
//! same contract: Firestore for deployments and an in-memory store for tests
//! and offline development.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{License, Plan, Subscription, User};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const LICENSES: &str = "licenses";
    pub const PLANS: &str = "plans";
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    /// Unique index: document id is the user's email
    pub const USER_EMAILS: &str = "user_emails";
    /// Unique index: document id is the user's Google id
    pub const USER_GOOGLE_IDS: &str = "user_google_ids";
    /// Unique index: document id is the license key hash
    pub const LICENSE_KEY_HASHES: &str = "license_key_hashes";
}

/// Store-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint was violated.
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// A write referenced a record that does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn user_by_google_id(&self, google_id: &str) -> StoreResult<Option<User>>;
    async fn user_by_refresh_token_hash(&self, hash: &str) -> StoreResult<Option<User>>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    async fn user_email_exists(&self, email: &str) -> StoreResult<bool> {
        Ok(self.user_by_email(email).await?.is_some())
    }
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn license_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<License>>;
    async fn license_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<License>>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn plan_by_id(&self, id: Uuid) -> StoreResult<Option<Plan>>;
    async fn plan_by_price_id(&self, stripe_price_id: &str) -> StoreResult<Option<Plan>>;
    async fn list_plans(&self) -> StoreResult<Vec<Plan>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscription_by_id(&self, id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn subscription_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn subscription_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>>;
    async fn subscription_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> StoreResult<Option<Subscription>>;
    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()>;
    /// Trials whose window ended before `before`. Read-only support for
    /// external expiry sweeps.
    async fn list_expired_trials(&self, before: DateTime<Utc>) -> StoreResult<Vec<Subscription>>;
}

/// The complete store: all repositories plus transactions.
#[async_trait]
pub trait Database: UserStore + LicenseStore + PlanStore + SubscriptionStore {
    /// Start a transaction. Writes are buffered until [`Transaction::commit`];
    /// dropping the handle without committing discards them.
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn Transaction + 'a>>;
}

/// Multi-entity write scope. Either every staged write is applied or none is.
#[async_trait]
pub trait Transaction: Send {
    async fn create_user(&mut self, user: &User) -> StoreResult<()>;
    async fn update_user(&mut self, user: &User) -> StoreResult<()>;
    async fn create_license(&mut self, license: &License) -> StoreResult<()>;
    async fn create_subscription(&mut self, subscription: &Subscription) -> StoreResult<()>;
    async fn update_subscription(&mut self, subscription: &Subscription) -> StoreResult<()>;
    /// Add `delta` seats and return the resulting count.
    async fn increment_seat_count(&mut self, subscription_id: Uuid, delta: i64)
        -> StoreResult<i64>;
    async fn commit(&mut self) -> StoreResult<()>;
    async fn rollback(&mut self) -> StoreResult<()>;
}
