// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Random secret generation and one-way derivation.
//!
//! Refresh tokens and license keys are handed to the client once and only
//! their SHA-256 digests are persisted. Lookups hash the presented value and
//! match on the digest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Random bytes in a refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 32;
/// 160 bits of key material, exactly 32 base32 characters.
pub const LICENSE_KEY_BYTES: usize = 20;
const LICENSE_KEY_GROUP: usize = 4;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A freshly generated secret and the digest to persist.
#[derive(Debug, Clone)]
pub struct GeneratedSecret {
    pub plaintext: String,
    pub hash: String,
}

/// Fill a buffer from the system CSPRNG. There is no fallback source.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| AppError::internal("system random source unavailable"))?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// New refresh token: 32 random bytes, URL-safe base64 without padding.
pub fn generate_refresh_token() -> Result<GeneratedSecret, AppError> {
    let plaintext = URL_SAFE_NO_PAD.encode(random_bytes::<REFRESH_TOKEN_BYTES>()?);
    let hash = hash_refresh_token(&plaintext);
    Ok(GeneratedSecret { plaintext, hash })
}

pub fn hash_refresh_token(plaintext: &str) -> String {
    sha256_hex(plaintext.as_bytes())
}

/// New license key, formatted as `XXXX-XXXX-...` in uppercase base32.
pub fn generate_license_key() -> Result<GeneratedSecret, AppError> {
    let encoded = base32_encode(&random_bytes::<LICENSE_KEY_BYTES>()?);
    let plaintext = encoded
        .as_bytes()
        .chunks(LICENSE_KEY_GROUP)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("-");
    let hash = hash_license_key(&plaintext);
    Ok(GeneratedSecret { plaintext, hash })
}

/// Strip grouping dashes and whitespace and uppercase. Formatting is
/// cosmetic; only the character sequence identifies a key.
pub fn normalize_license_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub fn hash_license_key(key: &str) -> String {
    sha256_hex(normalize_license_key(key).as_bytes())
}

/// Anti-forgery token bound into the session cookies and auth claims.
pub fn generate_xsrf_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// RFC 4648 base32 without padding.
fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}
