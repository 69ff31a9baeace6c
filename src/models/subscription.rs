// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscription model and status mapping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription status.
///
/// Stored and serialized as its wire string. Unrecognized strings map to
/// `Unknown` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Unknown,
    Trial,
    Active,
    Canceled,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Unknown => "unknown",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        match value {
            "trial" => SubscriptionStatus::Trial,
            "active" => SubscriptionStatus::Active,
            "canceled" => SubscriptionStatus::Canceled,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Unknown,
        }
    }

    /// Map a Stripe subscription status onto ours.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trial,
            "canceled" => SubscriptionStatus::Canceled,
            "past_due" => SubscriptionStatus::PastDue,
            _ => SubscriptionStatus::Unknown,
        }
    }

    /// Terminal negative states schedule the owner's account for deletion.
    pub fn is_delinquent(self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Canceled | SubscriptionStatus::PastDue
        )
    }
}

impl From<String> for SubscriptionStatus {
    fn from(value: String) -> Self {
        SubscriptionStatus::from_wire(&value)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription stored in Firestore, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub status: SubscriptionStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub trial_start: DateTime<Utc>,
    pub trial_end: DateTime<Utc>,
    pub seat_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Billing-provider view of a subscription, as carried by a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderState {
    pub status: SubscriptionStatus,
    /// `None` leaves the local plan untouched
    pub plan_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub subscription_id: String,
}

impl Subscription {
    /// Trial subscription created alongside a new account.
    pub fn new_trial(user_id: Uuid, now: DateTime<Utc>, trial_days: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            plan_id: None,
            status: SubscriptionStatus::Trial,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            trial_start: now,
            trial_end: now + Duration::days(trial_days),
            seat_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the license tied to this subscription may be used right now.
    pub fn grants_access(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active => true,
            SubscriptionStatus::Trial => now < self.trial_end,
            _ => false,
        }
    }

    /// Overwrite billing fields from the provider's view.
    ///
    /// Returns `true` if anything changed, so replays can be detected.
    pub fn apply_provider_state(&mut self, state: &ProviderState, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if self.status != state.status {
            self.status = state.status;
            changed = true;
        }
        if state.plan_id.is_some() && self.plan_id != state.plan_id {
            self.plan_id = state.plan_id;
            changed = true;
        }
        if state.customer_id.is_some() && self.stripe_customer_id != state.customer_id {
            self.stripe_customer_id = state.customer_id.clone();
            changed = true;
        }
        if self.stripe_subscription_id.as_deref() != Some(state.subscription_id.as_str()) {
            self.stripe_subscription_id = Some(state.subscription_id.clone());
            changed = true;
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }
}
