// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Entities live in one collection each, keyed by their UUID. Firestore has
//! no unique constraints, so emails, Google ids and license key hashes are
//! claimed through index collections whose document id is the unique value.
//! Index documents are written with an `Exists(false)` precondition in the
//! same transaction as the entity; a duplicate fails the commit.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreWritePrecondition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    collections, Database, LicenseStore, PlanStore, StoreError, StoreResult, SubscriptionStore,
    Transaction, UserStore,
};
use crate::models::{License, Plan, Subscription, SubscriptionStatus, User};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

/// Document in a unique-index collection.
#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    owner_id: String,
}

fn backend_error(err: FirestoreError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn commit_error(err: FirestoreError) -> StoreError {
    match err {
        FirestoreError::DataConflictError(_) => StoreError::AlreadyExists("unique value"),
        other => {
            let msg = other.to_string();
            if msg.contains("FailedPrecondition") || msg.contains("AlreadyExists") {
                StoreError::AlreadyExists("unique value")
            } else {
                StoreError::Backend(msg)
            }
        }
    }
}

/// Index document id for a free-form value (emails may contain '/').
fn index_key(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

async fn get_doc<T>(
    client: &firestore::FirestoreDb,
    collection: &str,
    id: &str,
) -> StoreResult<Option<T>>
where
    T: DeserializeOwned + Send,
{
    client
        .fluent()
        .select()
        .by_id_in(collection)
        .obj()
        .one(id)
        .await
        .map_err(backend_error)
}

async fn find_by_field<T>(
    client: &firestore::FirestoreDb,
    collection: &str,
    field: &str,
    value: &str,
) -> StoreResult<Option<T>>
where
    T: DeserializeOwned + Send,
{
    let docs: Vec<T> = client
        .fluent()
        .select()
        .from(collection)
        .filter(|q| q.field(field).eq(value))
        .limit(1)
        .obj()
        .query()
        .await
        .map_err(backend_error)?;
    Ok(docs.into_iter().next())
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> StoreResult<Self> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> StoreResult<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            StoreError::Backend(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> StoreResult<&firestore::FirestoreDb> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Backend("Database not connected (offline mode)".to_string()))
    }

    /// Create or replace a plan. Plans are maintained out of band; this is
    /// used by seeding scripts and emulator tests.
    pub async fn upsert_plan(&self, plan: &Plan) -> StoreResult<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PLANS)
            .document_id(plan.id.to_string())
            .object(plan)
            .execute()
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

// ─── User Operations ─────────────────────────────────────────

#[async_trait]
impl UserStore for FirestoreDb {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        get_doc(self.get_client()?, collections::USERS, &id.to_string()).await
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        find_by_field(self.get_client()?, collections::USERS, "email", email).await
    }

    async fn user_by_google_id(&self, google_id: &str) -> StoreResult<Option<User>> {
        find_by_field(self.get_client()?, collections::USERS, "google_id", google_id).await
    }

    async fn user_by_refresh_token_hash(&self, hash: &str) -> StoreResult<Option<User>> {
        find_by_field(
            self.get_client()?,
            collections::USERS,
            "refresh_token_hash",
            hash,
        )
        .await
    }

    /// Runs in its own transaction so index documents move with the user.
    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        tx.update_user(user).await?;
        tx.commit().await
    }

    async fn user_email_exists(&self, email: &str) -> StoreResult<bool> {
        let entry: Option<IndexEntry> = get_doc(
            self.get_client()?,
            collections::USER_EMAILS,
            &index_key(email),
        )
        .await?;
        Ok(entry.is_some())
    }
}

// ─── License Operations ──────────────────────────────────────

#[async_trait]
impl LicenseStore for FirestoreDb {
    async fn license_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<License>> {
        find_by_field(
            self.get_client()?,
            collections::LICENSES,
            "user_id",
            &user_id.to_string(),
        )
        .await
    }

    async fn license_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<License>> {
        find_by_field(self.get_client()?, collections::LICENSES, "key_hash", key_hash).await
    }
}

// ─── Plan Operations ─────────────────────────────────────────

#[async_trait]
impl PlanStore for FirestoreDb {
    async fn plan_by_id(&self, id: Uuid) -> StoreResult<Option<Plan>> {
        get_doc(self.get_client()?, collections::PLANS, &id.to_string()).await
    }

    async fn plan_by_price_id(&self, stripe_price_id: &str) -> StoreResult<Option<Plan>> {
        find_by_field(
            self.get_client()?,
            collections::PLANS,
            "stripe_price_id",
            stripe_price_id,
        )
        .await
    }

    async fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::PLANS)
            .order_by([("price", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(backend_error)
    }
}

// ─── Subscription Operations ─────────────────────────────────

#[async_trait]
impl SubscriptionStore for FirestoreDb {
    async fn subscription_by_id(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        get_doc(self.get_client()?, collections::SUBSCRIPTIONS, &id.to_string()).await
    }

    async fn subscription_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Subscription>> {
        find_by_field(
            self.get_client()?,
            collections::SUBSCRIPTIONS,
            "user_id",
            &user_id.to_string(),
        )
        .await
    }

    async fn subscription_by_stripe_subscription_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        find_by_field(
            self.get_client()?,
            collections::SUBSCRIPTIONS,
            "stripe_subscription_id",
            stripe_subscription_id,
        )
        .await
    }

    async fn subscription_by_stripe_customer_id(
        &self,
        stripe_customer_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        find_by_field(
            self.get_client()?,
            collections::SUBSCRIPTIONS,
            "stripe_customer_id",
            stripe_customer_id,
        )
        .await
    }

    async fn update_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SUBSCRIPTIONS)
            .document_id(subscription.id.to_string())
            .object(subscription)
            .execute()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn list_expired_trials(&self, before: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        // Timestamps are stored as RFC 3339 strings of varying precision, so
        // the date filter runs here rather than in the query.
        let trials: Vec<Subscription> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SUBSCRIPTIONS)
            .filter(|q| q.field("status").eq(SubscriptionStatus::Trial.as_str()))
            .obj()
            .query()
            .await
            .map_err(backend_error)?;
        Ok(trials.into_iter().filter(|s| s.trial_end < before).collect())
    }
}

#[async_trait]
impl Database for FirestoreDb {
    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn Transaction + 'a>> {
        let client = self.get_client()?;
        let transaction = client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))?;
        Ok(Box::new(FirestoreTransaction {
            client,
            inner: Some(transaction),
            staged_subscriptions: HashMap::new(),
        }))
    }
}

/// Transaction over [`FirestoreDb`]. Writes are sent with the commit.
pub struct FirestoreTransaction<'a> {
    client: &'a firestore::FirestoreDb,
    inner: Option<firestore::FirestoreTransaction<'a>>,
    /// Subscriptions already written in this transaction, so repeated seat
    /// increments see their own writes.
    staged_subscriptions: HashMap<Uuid, Subscription>,
}

impl<'a> FirestoreTransaction<'a> {
    fn inner(&mut self) -> StoreResult<&mut firestore::FirestoreTransaction<'a>> {
        self.inner
            .as_mut()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))
    }

    fn stage_set<T>(&mut self, collection: &str, id: &str, obj: &T) -> StoreResult<()>
    where
        T: Serialize + for<'de> Deserialize<'de> + Sync + Send,
    {
        let client = self.client;
        client
            .fluent()
            .update()
            .in_col(collection)
            .document_id(id)
            .object(obj)
            .add_to_transaction(self.inner()?)
            .map_err(backend_error)?;
        Ok(())
    }

    /// Claim `key` in an index collection; fails at commit if already taken.
    fn stage_claim(&mut self, collection: &str, key: &str, owner: Uuid) -> StoreResult<()> {
        let client = self.client;
        let entry = IndexEntry {
            owner_id: owner.to_string(),
        };
        client
            .fluent()
            .update()
            .in_col(collection)
            .precondition(FirestoreWritePrecondition::Exists(false))
            .document_id(key)
            .object(&entry)
            .add_to_transaction(self.inner()?)
            .map_err(backend_error)?;
        Ok(())
    }

    fn stage_release(&mut self, collection: &str, key: &str) -> StoreResult<()> {
        let client = self.client;
        client
            .fluent()
            .delete()
            .from(collection)
            .document_id(key)
            .add_to_transaction(self.inner()?)
            .map_err(backend_error)?;
        Ok(())
    }

    /// Read a subscription at the transaction's snapshot.
    async fn read_subscription(&mut self, id: Uuid) -> StoreResult<Subscription> {
        if let Some(staged) = self.staged_subscriptions.get(&id) {
            return Ok(staged.clone());
        }
        let transaction_id = self.inner()?.transaction_id().clone();
        let reader = self
            .client
            .clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
                transaction_id,
            ));
        get_doc(&reader, collections::SUBSCRIPTIONS, &id.to_string())
            .await?
            .ok_or(StoreError::NotFound("subscription"))
    }
}

#[async_trait]
impl Transaction for FirestoreTransaction<'_> {
    async fn create_user(&mut self, user: &User) -> StoreResult<()> {
        self.stage_claim(collections::USER_EMAILS, &index_key(&user.email), user.id)?;
        if let Some(google_id) = &user.google_id {
            self.stage_claim(collections::USER_GOOGLE_IDS, &index_key(google_id), user.id)?;
        }
        self.stage_set(collections::USERS, &user.id.to_string(), user)
    }

    async fn update_user(&mut self, user: &User) -> StoreResult<()> {
        let current: User = get_doc(self.client, collections::USERS, &user.id.to_string())
            .await?
            .ok_or(StoreError::NotFound("user"))?;

        if current.email != user.email {
            self.stage_claim(collections::USER_EMAILS, &index_key(&user.email), user.id)?;
            self.stage_release(collections::USER_EMAILS, &index_key(&current.email))?;
        }
        if current.google_id != user.google_id {
            if let Some(google_id) = &user.google_id {
                self.stage_claim(collections::USER_GOOGLE_IDS, &index_key(google_id), user.id)?;
            }
            if let Some(google_id) = &current.google_id {
                self.stage_release(collections::USER_GOOGLE_IDS, &index_key(google_id))?;
            }
        }
        self.stage_set(collections::USERS, &user.id.to_string(), user)
    }

    async fn create_license(&mut self, license: &License) -> StoreResult<()> {
        self.stage_claim(
            collections::LICENSE_KEY_HASHES,
            &license.key_hash,
            license.id,
        )?;
        self.stage_set(collections::LICENSES, &license.id.to_string(), license)
    }

    async fn create_subscription(&mut self, subscription: &Subscription) -> StoreResult<()> {
        self.stage_set(
            collections::SUBSCRIPTIONS,
            &subscription.id.to_string(),
            subscription,
        )?;
        self.staged_subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&mut self, subscription: &Subscription) -> StoreResult<()> {
        self.stage_set(
            collections::SUBSCRIPTIONS,
            &subscription.id.to_string(),
            subscription,
        )?;
        self.staged_subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn increment_seat_count(
        &mut self,
        subscription_id: Uuid,
        delta: i64,
    ) -> StoreResult<i64> {
        let mut subscription = self.read_subscription(subscription_id).await?;
        subscription.seat_count += delta;
        subscription.updated_at = Utc::now();
        self.update_subscription(&subscription).await?;
        Ok(subscription.seat_count)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let transaction = self
            .inner
            .take()
            .ok_or_else(|| StoreError::Backend("transaction already finished".to_string()))?;
        transaction.commit().await.map_err(commit_error)?;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if let Some(transaction) = self.inner.take() {
            transaction.rollback().await.map_err(backend_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_keys_escape_path_separators() {
        assert_eq!(index_key("a/b@example.com"), "a%2Fb%40example.com");
    }

    #[tokio::test]
    async fn offline_mode_reports_backend_errors() {
        let db = FirestoreDb::new_mock();
        assert!(matches!(
            db.user_by_id(Uuid::new_v4()).await,
            Err(StoreError::Backend(_))
        ));
        assert!(db.begin().await.is_err());
    }
}
