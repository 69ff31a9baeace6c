// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Billing reconciliation.
//!
//! Applies Stripe webhook events to local subscription state and drives the
//! subscription actions users can take (upgrade, cancel, seat changes).
//!
//! Each event is handled on its own: a failure aborts that event's side
//! effects, is logged, and the webhook is still acknowledged. Handlers
//! re-derive state from the full payload, so replays converge. A locally
//! `canceled` subscription never moves again for the same Stripe
//! subscription id; a resubscription arrives under a new id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::AppError;
use crate::models::subscription::ProviderState;
use crate::models::{License, Subscription, SubscriptionStatus, User};
use crate::services::stripe::{
    self, CheckoutSession, SignatureError, StripeSubscription, WebhookEvent,
};

/// Fields to change on a provider subscription item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionItemUpdate {
    pub price_id: Option<String>,
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub quantity: i64,
    pub user_id: Uuid,
    pub customer_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Billing provider API used by the portal.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Id of the (single) item on a provider subscription.
    async fn subscription_item_id(&self, subscription_id: &str) -> Result<String, AppError>;
    async fn update_subscription_item(
        &self,
        item_id: &str,
        update: SubscriptionItemUpdate,
    ) -> Result<(), AppError>;
    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), AppError>;
    /// Returns the hosted checkout URL.
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, AppError>;
    /// Returns the customer portal URL.
    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError>;
}

/// Result of applying one webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Skipped(String),
}

fn skipped(reason: impl Into<String>) -> Result<EventOutcome, AppError> {
    Ok(EventOutcome::Skipped(reason.into()))
}

#[derive(Clone)]
pub struct BillingService {
    db: Arc<dyn Database>,
    provider: Arc<dyn BillingProvider>,
    webhook_secret: String,
    /// Where Stripe sends the user back after checkout or the portal.
    return_url: String,
}

impl BillingService {
    pub fn new(
        db: Arc<dyn Database>,
        provider: Arc<dyn BillingProvider>,
        webhook_secret: String,
        base_url: &str,
    ) -> Self {
        Self {
            db,
            provider,
            webhook_secret,
            return_url: format!("{}/settings/billing", base_url),
        }
    }

    // ─── Webhooks ────────────────────────────────────────────────

    /// Check the signature and parse the event.
    pub fn verify_event(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, SignatureError> {
        stripe::verify_webhook_signature(
            payload,
            signature,
            &self.webhook_secret,
            Utc::now().timestamp(),
        )?;
        WebhookEvent::parse(payload)
    }

    /// Apply one event. Never fails; errors become a skipped outcome.
    pub async fn handle_event(&self, event: &WebhookEvent) -> EventOutcome {
        let result = match event.event_type.as_str() {
            "customer.subscription.created" => match event.object() {
                Ok(sub) => self.subscription_created(sub).await,
                Err(e) => Err(e),
            },
            "customer.subscription.updated" => match event.object() {
                Ok(sub) => self.subscription_updated(sub).await,
                Err(e) => Err(e),
            },
            "customer.subscription.deleted" => match event.object() {
                Ok(sub) => self.subscription_deleted(sub).await,
                Err(e) => Err(e),
            },
            "checkout.session.completed" => match event.object() {
                Ok(session) => self.checkout_completed(session).await,
                Err(e) => Err(e),
            },
            other => skipped(format!("unhandled event type {}", other)),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event aborted"
                );
                EventOutcome::Skipped(format!("aborted: {}", e.title()))
            }
        };

        match &outcome {
            EventOutcome::Applied => tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Webhook event applied"
            ),
            EventOutcome::Skipped(reason) => tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                reason = %reason,
                "Webhook event skipped"
            ),
        }
        outcome
    }

    async fn subscription_created(&self, sub: StripeSubscription) -> Result<EventOutcome, AppError> {
        let Some(user_id) = metadata_user_id(&sub) else {
            return skipped("missing or invalid user_id metadata");
        };
        let Some(local) = self.db.subscription_by_user_id(user_id).await? else {
            return skipped("no local subscription for user");
        };
        if canceled_for(&local, &sub) {
            return skipped("subscription already canceled");
        }
        let Some(plan_id) = self.plan_for(&sub).await? else {
            return skipped("unknown price");
        };
        self.reconcile(local, provider_state(&sub, Some(plan_id)))
            .await
    }

    async fn subscription_updated(&self, sub: StripeSubscription) -> Result<EventOutcome, AppError> {
        let Some(local) = self.resolve(&sub).await? else {
            return skipped("unknown subscription");
        };
        if superseded_by(&local, &sub) {
            return skipped("event for superseded subscription");
        }
        if canceled_for(&local, &sub) {
            return skipped("subscription already canceled");
        }
        let Some(plan_id) = self.plan_for(&sub).await? else {
            return skipped("unknown price");
        };
        self.reconcile(local, provider_state(&sub, Some(plan_id)))
            .await
    }

    async fn subscription_deleted(&self, sub: StripeSubscription) -> Result<EventOutcome, AppError> {
        let Some(local) = self.resolve(&sub).await? else {
            return skipped("unknown subscription");
        };
        if superseded_by(&local, &sub) {
            return skipped("event for superseded subscription");
        }
        let mut state = provider_state(&sub, None);
        state.status = SubscriptionStatus::Canceled;
        self.reconcile(local, state).await
    }

    /// Link the Stripe customer (and, for a fresh subscription, the Stripe
    /// subscription) to the user who went through checkout. Status is left
    /// to the subscription events.
    async fn checkout_completed(&self, session: CheckoutSession) -> Result<EventOutcome, AppError> {
        let user_id = session
            .client_reference_id
            .as_deref()
            .or_else(|| session.metadata.get("user_id").map(String::as_str))
            .and_then(|id| Uuid::parse_str(id).ok());
        let Some(user_id) = user_id else {
            return skipped("missing client_reference_id");
        };
        let Some(mut local) = self.db.subscription_by_user_id(user_id).await? else {
            return skipped("no local subscription for user");
        };

        let mut changed = false;
        if let Some(customer) = &session.customer {
            if local.stripe_customer_id.as_deref() != Some(customer.id()) {
                local.stripe_customer_id = Some(customer.id().to_string());
                changed = true;
            }
        }
        if let Some(subscription) = &session.subscription {
            if local.stripe_subscription_id.is_none() {
                local.stripe_subscription_id = Some(subscription.id().to_string());
                changed = true;
            }
        }
        if !changed {
            return skipped("no changes");
        }
        local.updated_at = Utc::now();
        self.db.update_subscription(&local).await?;
        Ok(EventOutcome::Applied)
    }

    /// Find the local subscription for a Stripe subscription, falling back
    /// to the user id in metadata. The fallback row may already be linked to
    /// a newer Stripe subscription; callers check with [`superseded_by`].
    async fn resolve(&self, sub: &StripeSubscription) -> Result<Option<Subscription>, AppError> {
        if let Some(local) = self
            .db
            .subscription_by_stripe_subscription_id(&sub.id)
            .await?
        {
            return Ok(Some(local));
        }
        match metadata_user_id(sub) {
            Some(user_id) => Ok(self.db.subscription_by_user_id(user_id).await?),
            None => Ok(None),
        }
    }

    async fn plan_for(&self, sub: &StripeSubscription) -> Result<Option<Uuid>, AppError> {
        let Some(item) = sub.items.data.first() else {
            return Ok(None);
        };
        Ok(self
            .db
            .plan_by_price_id(&item.price.id)
            .await?
            .map(|plan| plan.id))
    }

    async fn reconcile(
        &self,
        mut local: Subscription,
        state: ProviderState,
    ) -> Result<EventOutcome, AppError> {
        let changed = local.apply_provider_state(&state, Utc::now());
        if changed {
            self.db.update_subscription(&local).await?;
            tracing::info!(
                subscription_id = %local.id,
                user_id = %local.user_id,
                status = %local.status,
                "Subscription reconciled"
            );
        }
        // Runs on replays too, so a schedule that failed to persist heals.
        self.sync_deletion_schedule(local.user_id, local.status)
            .await;
        if changed {
            Ok(EventOutcome::Applied)
        } else {
            skipped("no changes")
        }
    }

    /// Schedule deletion for delinquent subscriptions and cancel it when the
    /// subscription recovers. Best effort: failures are logged only.
    async fn sync_deletion_schedule(&self, user_id: Uuid, status: SubscriptionStatus) {
        let mut user = match self.db.user_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::warn!(%user_id, "Subscription owner not found");
                return;
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Failed to load subscription owner");
                return;
            }
        };

        let now = Utc::now();
        let changed = match status {
            s if s.is_delinquent() => user.schedule_deletion(now),
            SubscriptionStatus::Active | SubscriptionStatus::Trial => {
                user.clear_scheduled_deletion(now)
            }
            _ => false,
        };
        if !changed {
            return;
        }

        match self.db.update_user(&user).await {
            Ok(()) => tracing::info!(
                %user_id,
                scheduled_deletion_at = ?user.scheduled_deletion_at,
                "Account deletion schedule updated"
            ),
            Err(e) => tracing::error!(%user_id, error = %e, "Failed to update deletion schedule"),
        }
    }

    // ─── User actions ────────────────────────────────────────────

    /// Add `delta` seats to the subscription owning `license`.
    ///
    /// The increment and the push to Stripe succeed or fail together: the
    /// local change is rolled back if the subscription is delinquent or the
    /// provider call fails. Trials are not billed and skip the push.
    pub async fn update_seats(&self, license: &License, delta: i64) -> Result<i64, AppError> {
        if delta == 0 {
            return Err(AppError::InvalidArgument("seat delta must be non-zero".into()));
        }
        let sub = self
            .db
            .subscription_by_user_id(license.user_id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;

        let mut tx = self.db.begin().await?;
        let result = async {
            let seat_count = tx.increment_seat_count(sub.id, delta).await?;
            if seat_count < 1 {
                return Err(AppError::InvalidArgument(
                    "subscription must keep at least one seat".into(),
                ));
            }
            match sub.status {
                SubscriptionStatus::Trial => return Ok(seat_count),
                SubscriptionStatus::PastDue | SubscriptionStatus::Canceled => {
                    return Err(AppError::internal(format!(
                        "cannot change seats on a {} subscription",
                        sub.status
                    )));
                }
                _ => {}
            }
            let (Some(_), Some(stripe_subscription_id)) =
                (&sub.stripe_customer_id, &sub.stripe_subscription_id)
            else {
                return Err(AppError::internal("subscription is not linked to Stripe"));
            };
            let item_id = self
                .provider
                .subscription_item_id(stripe_subscription_id)
                .await?;
            self.provider
                .update_subscription_item(
                    &item_id,
                    SubscriptionItemUpdate {
                        price_id: None,
                        quantity: Some(seat_count),
                    },
                )
                .await?;
            Ok::<_, AppError>(seat_count)
        }
        .await;

        match result {
            Ok(seat_count) => {
                tx.commit().await?;
                tracing::info!(subscription_id = %sub.id, seat_count, "Seats updated");
                Ok(seat_count)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Seat update rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Move the user's Stripe subscription to another plan.
    pub async fn upgrade(&self, user: &User, plan_id: Uuid) -> Result<Subscription, AppError> {
        let plan = self
            .db
            .plan_by_id(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound)?;
        let mut sub = self
            .db
            .subscription_by_user_id(user.id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;
        if sub.status == SubscriptionStatus::Canceled {
            return Err(AppError::InvalidArgument(
                "subscription is canceled; start a new checkout".into(),
            ));
        }
        let Some(stripe_subscription_id) = sub.stripe_subscription_id.clone() else {
            return Err(AppError::InvalidArgument(
                "no billing subscription; start a checkout first".into(),
            ));
        };

        let item_id = self
            .provider
            .subscription_item_id(&stripe_subscription_id)
            .await?;
        self.provider
            .update_subscription_item(
                &item_id,
                SubscriptionItemUpdate {
                    price_id: Some(plan.stripe_price_id.clone()),
                    quantity: Some(sub.seat_count),
                },
            )
            .await?;

        sub.plan_id = Some(plan.id);
        sub.status = SubscriptionStatus::Active;
        sub.updated_at = Utc::now();
        self.db.update_subscription(&sub).await?;
        self.sync_deletion_schedule(user.id, sub.status).await;
        tracing::info!(user_id = %user.id, plan = %plan.name, "Subscription upgraded");
        Ok(sub)
    }

    /// Cancel the user's subscription now and schedule account deletion.
    pub async fn cancel(&self, user: &User) -> Result<Subscription, AppError> {
        let mut sub = self
            .db
            .subscription_by_user_id(user.id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;
        if sub.status == SubscriptionStatus::Canceled {
            return Ok(sub);
        }
        if let Some(stripe_subscription_id) = &sub.stripe_subscription_id {
            self.provider
                .cancel_subscription(stripe_subscription_id)
                .await?;
        }
        sub.status = SubscriptionStatus::Canceled;
        sub.updated_at = Utc::now();
        self.db.update_subscription(&sub).await?;
        self.sync_deletion_schedule(user.id, sub.status).await;
        tracing::info!(user_id = %user.id, "Subscription canceled");
        Ok(sub)
    }

    pub async fn checkout_url(&self, user: &User, plan_id: Uuid) -> Result<String, AppError> {
        let plan = self
            .db
            .plan_by_id(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound)?;
        let sub = self
            .db
            .subscription_by_user_id(user.id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;
        self.provider
            .create_checkout_session(CheckoutRequest {
                price_id: plan.stripe_price_id,
                quantity: sub.seat_count.max(1),
                user_id: user.id,
                customer_id: sub.stripe_customer_id,
                success_url: self.return_url.clone(),
                cancel_url: self.return_url.clone(),
            })
            .await
    }

    pub async fn portal_url(&self, user: &User) -> Result<String, AppError> {
        let sub = self
            .db
            .subscription_by_user_id(user.id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)?;
        let customer_id = sub
            .stripe_customer_id
            .ok_or_else(|| AppError::InvalidArgument("No Stripe customer found".into()))?;
        self.provider
            .create_portal_session(&customer_id, &self.return_url)
            .await
    }
}

/// The local row is linked to a different Stripe subscription than the
/// event's, so the event is about one the user has since replaced.
fn superseded_by(local: &Subscription, sub: &StripeSubscription) -> bool {
    local
        .stripe_subscription_id
        .as_deref()
        .is_some_and(|id| id != sub.id)
}

/// `Canceled` is terminal for a given Stripe subscription id.
fn canceled_for(local: &Subscription, sub: &StripeSubscription) -> bool {
    local.status == SubscriptionStatus::Canceled
        && local.stripe_subscription_id.as_deref() == Some(sub.id.as_str())
}

fn metadata_user_id(sub: &StripeSubscription) -> Option<Uuid> {
    sub.metadata
        .get("user_id")
        .and_then(|id| Uuid::parse_str(id).ok())
}

fn provider_state(sub: &StripeSubscription, plan_id: Option<Uuid>) -> ProviderState {
    ProviderState {
        status: SubscriptionStatus::from_provider(&sub.status),
        plan_id,
        customer_id: sub.customer.as_ref().map(|c| c.id().to_string()),
        subscription_id: sub.id.clone(),
    }
}
