// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User model for storage and API.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grace period between a subscription going bad and account deletion.
pub const DELETION_GRACE_PERIOD_DAYS: i64 = 30;

/// User account stored in Firestore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Also used as document ID
    pub id: Uuid,
    /// Unique across all users
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Google account subject, unique when present
    pub google_id: Option<String>,
    /// SHA-256 of the current refresh token; `None` means no active session
    pub refresh_token_hash: Option<String>,
    /// Set when the subscription reached a terminal state
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, first_name: &str, last_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            google_id: None,
            refresh_token_hash: None,
            scheduled_deletion_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Schedule deletion after the grace period.
    ///
    /// Returns `false` when a deletion is already scheduled; the original
    /// date is kept.
    pub fn schedule_deletion(&mut self, now: DateTime<Utc>) -> bool {
        if self.scheduled_deletion_at.is_some() {
            return false;
        }
        self.scheduled_deletion_at = Some(now + Duration::days(DELETION_GRACE_PERIOD_DAYS));
        self.updated_at = now;
        true
    }

    /// Cancel a pending deletion. Returns `false` if none was scheduled.
    pub fn clear_scheduled_deletion(&mut self, now: DateTime<Utc>) -> bool {
        if self.scheduled_deletion_at.take().is_none() {
            return false;
        }
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deletion_scheduling_is_idempotent() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", "A", "B", now);

        assert!(user.schedule_deletion(now));
        let first = user.scheduled_deletion_at;
        assert_eq!(first, Some(now + Duration::days(30)));

        assert!(!user.schedule_deletion(now + Duration::days(3)));
        assert_eq!(user.scheduled_deletion_at, first);

        assert!(user.clear_scheduled_deletion(now));
        assert!(!user.clear_scheduled_deletion(now));
        assert!(user.scheduled_deletion_at.is_none());
    }
}
