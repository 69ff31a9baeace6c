// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process entitlement store.
//!
//! Enforces the same uniqueness and ownership rules as the Firestore
//! backend. A transaction records its writes and replays them against a
//! copy of the state, so every staged write is validated immediately and the
//! whole set is applied under one write lock at commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Database, LicenseStore, PlanStore, StoreError, StoreResult, SubscriptionStore, Transaction,
    UserStore,
};
use crate::models::{License, Plan, Subscription, SubscriptionStatus, User};

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    licenses: HashMap<Uuid, License>,
    plans: HashMap<Uuid, Plan>,
    subscriptions: HashMap<Uuid, Subscription>,
}

#[derive(Debug, Clone)]
enum Write {
    CreateUser(User),
    UpdateUser(User),
    CreateLicense(License),
    CreateSubscription(Subscription),
    UpdateSubscription(Subscription),
    AddSeats(Uuid, i64),
}

impl State {
    fn check_user_unique(&self, user: &User) -> StoreResult<()> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(StoreError::AlreadyExists("user email"));
            }
            if user.google_id.is_some() && other.google_id == user.google_id {
                return Err(StoreError::AlreadyExists("user google id"));
            }
        }
        Ok(())
    }

    /// Apply one write. Returns the new seat count for `AddSeats`.
    fn apply(&mut self, write: &Write) -> StoreResult<Option<i64>> {
        match write {
            Write::CreateUser(user) => {
                if self.users.contains_key(&user.id) {
                    return Err(StoreError::AlreadyExists("user"));
                }
                self.check_user_unique(user)?;
                self.users.insert(user.id, user.clone());
            }
            Write::UpdateUser(user) => {
                if !self.users.contains_key(&user.id) {
                    return Err(StoreError::NotFound("user"));
                }
                self.check_user_unique(user)?;
                self.users.insert(user.id, user.clone());
            }
            Write::CreateLicense(license) => {
                if !self.users.contains_key(&license.user_id) {
                    return Err(StoreError::NotFound("user"));
                }
                if self.licenses.values().any(|l| l.user_id == license.user_id) {
                    return Err(StoreError::AlreadyExists("license for user"));
                }
                if self.licenses.values().any(|l| l.key_hash == license.key_hash) {
                    return Err(StoreError::AlreadyExists("license key"));
                }
                self.licenses.insert(license.id, license.clone());
            }
            Write::CreateSubscription(sub) => {
                if !self.users.contains_key(&sub.user_id) {
                    return Err(StoreError::NotFound("user"));
                }
                if self.subscriptions.values().any(|s| s.user_id == sub.user_id) {
                    return Err(StoreError::AlreadyExists("subscription for user"));
                }
                self.subscriptions.insert(sub.id, sub.clone());
            }
            Write::UpdateSubscription(sub) => {
                if !self.subscriptions.contains_key(&sub.id) {
                    return Err(StoreError::NotFound("subscription"));
                }
                self.subscriptions.insert(sub.id, sub.clone());
            }
            Write::AddSeats(id, delta) => {
                let sub = self
                    .subscriptions
                    .get_mut(id)
                    .ok_or(StoreError::NotFound("subscription"))?;
                sub.seat_count += delta;
                sub.updated_at = Utc::now();
                return Ok(Some(sub.seat_count));
            }
        }
        Ok(None)
    }
}

/// In-memory database, cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<RwLock<State>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the plan catalog.
    pub async fn insert_plan(&self, plan: Plan) {
        self.state.write().await.plans.insert(plan.id, plan);
    }

    async fn find_user(&self, pred: impl Fn(&User) -> bool) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.values().find(|u| pred(u)).cloned())
    }

    async fn find_subscription(
        &self,
        pred: impl Fn(&Subscription) -> bool,
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| pred(s))
            .cloned())
    }

    async fn write_now(&self, write: Write) -> StoreResult<()> {
        self.state.write().await.apply(&write)?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryDb {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.email == email).await
    }

    async fn user_by_google_id(&self, google_id: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.google_id.as_deref() == Some(google_id))
            .await
    }

    async fn user_by_refresh_token_hash(&self, hash: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.refresh_token_hash.as_deref() == Some(hash))
            .await
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.write_now(Write::UpdateUser(user.clone())).await
    }
}

#[async_trait]
impl LicenseStore for MemoryDb {
    async fn license_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<License>> {
        Ok(self
            .state
            .read()
            .await
            .licenses
            .values()
            .find(|l| l.user_id == user_id)
            .cloned())
    }

    async fn license_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<License>> {
        Ok(self
            .state
            .read()
            .await
            .licenses
            .values()
            .find(|l| l.key_hash == key_hash)
            .cloned())
    }
}

#[async_trait]
impl PlanStore for MemoryDb {
    async fn plan_by_id(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        Ok(self.state.read().await.plans.get(&id).cloned())
    }

    async fn plan_by_price_id(&self, stripe_price_id: &str) -> StoreResult<Option<Plan>> {
        Ok(self
            .state
            .read()
            .await
            .plans
            .values()
            .find(|p| p.stripe_price_id == stripe_price_id)
            .cloned())
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self.state.read().await.plans.values().cloned().collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        Ok(plans)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryDb {
    async fn subscription_by_id(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.state.read().await.subscriptions.get(&id).cloned())
    }

    async fn subscription_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        self.find_subscription(|s| s.user_id == user_id).await
    }

    async fn subscription_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        self.find_subscription(|s| {
            s.stripe_subscription_id.as_deref() == Some(stripe_subscription_id)
        })
        .await
    }

    async fn subscription_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        self.find_subscription(|s| s.stripe_customer_id.as_deref() == Some(stripe_customer_id))
            .await
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        self.write_now(Write::UpdateSubscription(subscription.clone()))
            .await
    }

    async fn list_expired_trials(&self, before: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Trial && s.trial_end < before)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Database for MemoryDb {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn Transaction + 'a>> {
        Ok(Box::new(MemoryTransaction {
            db: self,
            writes: Vec::new(),
            finished: false,
        }))
    }
}

/// Transaction over [`MemoryDb`].
pub struct MemoryTransaction<'a> {
    db: &'a MemoryDb,
    writes: Vec<Write>,
    finished: bool,
}

impl MemoryTransaction<'_> {
    /// Validate `write` against the current state plus everything already
    /// staged, then stage it.
    async fn stage(&mut self, write: Write) -> StoreResult<Option<i64>> {
        if self.finished {
            return Err(StoreError::Backend("transaction already finished".into()));
        }
        let mut scratch = self.db.state.read().await.clone();
        for staged in &self.writes {
            scratch.apply(staged)?;
        }
        let result = scratch.apply(&write)?;
        self.writes.push(write);
        Ok(result)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction<'_> {
    async fn create_user(&mut self, user: &User) -> StoreResult<()> {
        self.stage(Write::CreateUser(user.clone())).await?;
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        self.stage(Write::UpdateUser(user.clone())).await?;
        Ok(())
    }

    async fn create_license(&mut self, license: &License) -> StoreResult<()> {
        self.stage(Write::CreateLicense(license.clone())).await?;
        Ok(())
    }

    async fn create_subscription(&mut self, subscription: &Subscription) -> StoreResult<()> {
        self.stage(Write::CreateSubscription(subscription.clone()))
            .await?;
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> StoreResult<()> {
        self.stage(Write::UpdateSubscription(subscription.clone()))
            .await?;
        Ok(())
    }

    async fn increment_seat_count(
        &mut self,
        subscription_id: Uuid,
        delta: i64,
    ) -> StoreResult<i64> {
        self.stage(Write::AddSeats(subscription_id, delta))
            .await?
            .ok_or(StoreError::Backend("seat increment returned no count".into()))
    }

    async fn commit(&mut self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::Backend("transaction already finished".into()));
        }
        self.finished = true;

        // Replay against a copy so a conflict with a concurrent commit leaves
        // the store untouched.
        let mut guard = self.db.state.write().await;
        let mut next = guard.clone();
        for write in &self.writes {
            next.apply(write)?;
        }
        *guard = next;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.finished = true;
        self.writes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn license_for(user: &User, key_hash: &str) -> License {
        let now = Utc::now();
        License {
            id: Uuid::new_v4(),
            user_id: user.id,
            key_hash: key_hash.to_string(),
            key_ciphertext: String::new(),
            key_nonce: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let db = MemoryDb::new();
        let user = User::new("a@example.com", "A", "B", Utc::now());
        {
            let mut tx = db.begin().await.unwrap();
            tx.create_user(&user).await.unwrap();
        }
        assert!(db.user_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let db = MemoryDb::new();
        let first = User::new("first@example.com", "A", "B", Utc::now());
        let mut tx = db.begin().await.unwrap();
        tx.create_user(&first).await.unwrap();
        tx.create_license(&license_for(&first, "hash-1"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let second = User::new("second@example.com", "C", "D", Utc::now());
        let mut tx = db.begin().await.unwrap();
        tx.create_user(&second).await.unwrap();
        let err = tx
            .create_license(&license_for(&second, "hash-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists("license key")));
        drop(tx);

        assert!(db.user_by_id(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_already_exists() {
        let db = MemoryDb::new();
        let a = User::new("same@example.com", "A", "B", Utc::now());
        let b = User::new("same@example.com", "C", "D", Utc::now());

        let mut tx = db.begin().await.unwrap();
        tx.create_user(&a).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert!(matches!(
            tx.create_user(&b).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_registrations_conflict_at_commit() {
        let db = MemoryDb::new();
        let a = User::new("race@example.com", "A", "B", Utc::now());
        let b = User::new("race@example.com", "C", "D", Utc::now());

        let mut tx_a = db.begin().await.unwrap();
        let mut tx_b = db.begin().await.unwrap();
        tx_a.create_user(&a).await.unwrap();
        tx_b.create_user(&b).await.unwrap();

        tx_a.commit().await.unwrap();
        assert!(matches!(
            tx_b.commit().await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(
            db.user_by_email("race@example.com").await.unwrap().unwrap().id,
            a.id
        );
    }

    #[tokio::test]
    async fn seat_increments_accumulate_within_transaction() {
        let db = MemoryDb::new();
        let user = User::new("seats@example.com", "A", "B", Utc::now());
        let sub = Subscription::new_trial(user.id, Utc::now(), 14);

        let mut tx = db.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.create_subscription(&sub).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(tx.increment_seat_count(sub.id, 2).await.unwrap(), 3);
        assert_eq!(tx.increment_seat_count(sub.id, 1).await.unwrap(), 4);
        tx.commit().await.unwrap();

        let stored = db.subscription_by_id(sub.id).await.unwrap().unwrap();
        assert_eq!(stored.seat_count, 4);
    }
}
