// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License key encryption at rest.
//!
//! AES-256-GCM with a fresh random nonce per call. The key is derived once
//! at startup from the configured secret with HKDF-SHA256. The owning user
//! id is bound as associated data, so a ciphertext copied onto another
//! account fails to open.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::License;
use crate::services::secrets::{self, GeneratedSecret};

const KEY_INFO: &[u8] = b"license-portal/license-key/aes-256-gcm";

/// Symmetric encryption service.
#[derive(Clone)]
pub struct EncryptionService {
    key: Arc<LessSafeKey>,
}

impl EncryptionService {
    /// Derive the AES key from the master secret.
    pub fn new(secret: &[u8]) -> Result<Self, AppError> {
        if secret.len() < 32 {
            return Err(AppError::internal(
                "encryption secret must be at least 32 bytes",
            ));
        }
        let mut okm = [0u8; 32];
        Hkdf::<Sha256>::new(None, secret)
            .expand(KEY_INFO, &mut okm)
            .map_err(|_| AppError::internal("HKDF expand failed"))?;
        let unbound = UnboundKey::new(&AES_256_GCM, &okm)
            .map_err(|_| AppError::internal("invalid AES key"))?;
        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
        })
    }

    /// Encrypt `plaintext`, returning `(ciphertext, nonce)`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, Vec<u8>), AppError> {
        let nonce_bytes = secrets::random_bytes::<NONCE_LEN>()?;
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| AppError::internal("encryption failed"))?;
        Ok((in_out, nonce_bytes.to_vec()))
    }

    /// Decrypt and authenticate. Fails without returning any plaintext if
    /// the tag, nonce, key or associated data do not match.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Vec<u8>, AppError> {
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| AppError::internal("invalid nonce length"))?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| AppError::internal("decryption failed"))?;
        Ok(plaintext.to_vec())
    }

    /// Build the license record for a freshly generated key.
    pub fn seal_license(&self, user_id: Uuid, key: &GeneratedSecret) -> Result<License, AppError> {
        let (ciphertext, nonce) = self.encrypt(key.plaintext.as_bytes(), user_id.as_bytes())?;
        let now = Utc::now();
        Ok(License {
            id: Uuid::new_v4(),
            user_id,
            key_hash: key.hash.clone(),
            key_ciphertext: BASE64.encode(ciphertext),
            key_nonce: BASE64.encode(nonce),
            created_at: now,
            updated_at: now,
        })
    }

    /// Decrypt a license key for display to its owner.
    pub fn reveal_license(&self, license: &License) -> Result<String, AppError> {
        let ciphertext = BASE64
            .decode(&license.key_ciphertext)
            .map_err(|e| AppError::internal(format!("corrupt license ciphertext: {e}")))?;
        let nonce = BASE64
            .decode(&license.key_nonce)
            .map_err(|e| AppError::internal(format!("corrupt license nonce: {e}")))?;
        let plaintext = self.decrypt(&ciphertext, &nonce, license.user_id.as_bytes())?;
        String::from_utf8(plaintext).map_err(|e| AppError::internal(format!("UTF-8 decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new(b"unit-test-encryption-secret-32-bytes").unwrap()
    }

    #[test]
    fn round_trip() {
        let enc = service();
        for plaintext in [&b""[..], b"x", b"ABCD-EFGH-IJKL-MNOP", &[0u8; 1024]] {
            let (ct, nonce) = enc.encrypt(plaintext, b"ctx").unwrap();
            assert_eq!(enc.decrypt(&ct, &nonce, b"ctx").unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_are_unique_per_call() {
        let enc = service();
        let (ct1, n1) = enc.encrypt(b"same", b"").unwrap();
        let (ct2, n2) = enc.encrypt(b"same", b"").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn tampering_fails_closed() {
        let enc = service();
        let (mut ct, nonce) = enc.encrypt(b"secret key", b"ctx").unwrap();

        let mut wrong_nonce = nonce.clone();
        wrong_nonce[0] ^= 1;
        assert!(enc.decrypt(&ct, &wrong_nonce, b"ctx").is_err());
        assert!(enc.decrypt(&ct, &nonce, b"other").is_err());
        assert!(enc.decrypt(&ct, &nonce[..8], b"ctx").is_err());

        ct[0] ^= 1;
        assert!(enc.decrypt(&ct, &nonce, b"ctx").is_err());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let (ct, nonce) = service().encrypt(b"secret key", b"").unwrap();
        let other = EncryptionService::new(b"another-encryption-secret-of-32-bytes").unwrap();
        assert!(other.decrypt(&ct, &nonce, b"").is_err());
    }

    #[test]
    fn short_secret_rejected() {
        assert!(EncryptionService::new(b"too short").is_err());
    }

    #[test]
    fn license_bound_to_owner() {
        let enc = service();
        let key = secrets::generate_license_key().unwrap();
        let mut license = enc.seal_license(Uuid::new_v4(), &key).unwrap();
        assert_eq!(enc.reveal_license(&license).unwrap(), key.plaintext);
        assert!(!license.key_ciphertext.contains(&key.plaintext));

        license.user_id = Uuid::new_v4();
        assert!(enc.reveal_license(&license).is_err());
    }
}
