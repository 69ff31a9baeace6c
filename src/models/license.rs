// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License model. The key itself is only stored encrypted and hashed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// License stored in Firestore, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 (hex) of the normalized key, unique
    pub key_hash: String,
    /// AES-GCM ciphertext of the formatted key (base64)
    pub key_ciphertext: String,
    /// Nonce used for `key_ciphertext` (base64)
    pub key_nonce: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
