// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Purpose-scoped JWTs.
//!
//! Every token carries the issuer and a `purpose` claim. Parsing checks the
//! signature, expiry, issuer and purpose, so a token minted for one flow is
//! rejected by every other flow even when its claim shape happens to fit.
//! All parse failures surface as `Unauthenticated`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const ISSUER: &str = "portal.license";

/// Magic link and magic-link registration tokens.
pub const MAGIC_LINK_TTL_MINUTES: i64 = 15;
/// Google OAuth state and registration tokens.
pub const GOOGLE_TTL_MINUTES: i64 = 5;
pub const EMAIL_CHANGE_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Auth,
    MagicLink,
    MagicLinkRegistration,
    GoogleAuthLink,
    GoogleRegistration,
    UpdateEmail,
}

trait Purposed {
    fn purpose(&self) -> TokenPurpose;
}

/// Session access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    /// User id
    pub sub: String,
    pub xsrf_token: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl AuthClaims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Unauthenticated("malformed subject".to_string()))
    }
}

/// Magic link and magic-link registration tokens; subject is the email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailClaims {
    pub sub: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// OAuth `state` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleStateClaims {
    /// Random value making each state unique
    pub nonce: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Carries the Google profile from the callback to registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleRegistrationClaims {
    /// Email
    pub sub: String,
    pub google_id: String,
    pub first_name: String,
    pub last_name: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChangeClaims {
    /// User id
    pub sub: String,
    /// New email address
    pub email: String,
    pub purpose: TokenPurpose,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl EmailChangeClaims {
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Unauthenticated("malformed subject".to_string()))
    }
}

impl Purposed for AuthClaims {
    fn purpose(&self) -> TokenPurpose {
        self.purpose
    }
}

impl Purposed for EmailClaims {
    fn purpose(&self) -> TokenPurpose {
        self.purpose
    }
}

impl Purposed for GoogleStateClaims {
    fn purpose(&self) -> TokenPurpose {
        self.purpose
    }
}

impl Purposed for GoogleRegistrationClaims {
    fn purpose(&self) -> TokenPurpose {
        self.purpose
    }
}

impl Purposed for EmailChangeClaims {
    fn purpose(&self) -> TokenPurpose {
        self.purpose
    }
}

/// Profile fields carried in a Google registration token.
#[derive(Debug, Clone)]
pub struct GoogleRegistration<'a> {
    pub email: &'a str,
    pub google_id: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

/// Signs and verifies all bearer tokens with one HS256 key.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(signing_key: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(signing_key),
            decoding: DecodingKey::from_secret(signing_key),
            validation,
        }
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT signing failed: {}", e)))
    }

    fn parse<C>(&self, token: &str, expected: TokenPurpose) -> Result<C, AppError>
    where
        C: DeserializeOwned + Purposed,
    {
        if token.is_empty() {
            return Err(AppError::Unauthenticated("empty token".to_string()));
        }
        let data = decode::<C>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(kind = ?e.kind(), ?expected, "Token rejected");
            AppError::Unauthenticated("invalid token".to_string())
        })?;
        if data.claims.purpose() != expected {
            tracing::debug!(
                got = ?data.claims.purpose(),
                ?expected,
                "Token rejected: wrong purpose"
            );
            return Err(AppError::Unauthenticated("wrong token purpose".to_string()));
        }
        Ok(data.claims)
    }

    fn window(ttl: Duration) -> (i64, i64) {
        let now = Utc::now();
        (now.timestamp(), (now + ttl).timestamp())
    }

    // ─── Auth ────────────────────────────────────────────────────

    /// Access token. Its lifetime is chosen by the caller from config.
    pub fn sign_auth_token(
        &self,
        user_id: Uuid,
        xsrf_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AppError> {
        self.sign(&AuthClaims {
            sub: user_id.to_string(),
            xsrf_token: xsrf_token.to_string(),
            purpose: TokenPurpose::Auth,
            iss: ISSUER.to_string(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        })
    }

    pub fn parse_auth_token(&self, token: &str) -> Result<AuthClaims, AppError> {
        self.parse(token, TokenPurpose::Auth)
    }

    // ─── Magic link ──────────────────────────────────────────────

    fn sign_email_token(&self, email: &str, purpose: TokenPurpose) -> Result<String, AppError> {
        let (iat, exp) = Self::window(Duration::minutes(MAGIC_LINK_TTL_MINUTES));
        self.sign(&EmailClaims {
            sub: email.to_string(),
            purpose,
            iss: ISSUER.to_string(),
            iat,
            exp,
        })
    }

    pub fn sign_magic_link_token(&self, email: &str) -> Result<String, AppError> {
        self.sign_email_token(email, TokenPurpose::MagicLink)
    }

    pub fn parse_magic_link_token(&self, token: &str) -> Result<EmailClaims, AppError> {
        self.parse(token, TokenPurpose::MagicLink)
    }

    pub fn sign_magic_link_registration_token(&self, email: &str) -> Result<String, AppError> {
        self.sign_email_token(email, TokenPurpose::MagicLinkRegistration)
    }

    pub fn parse_magic_link_registration_token(
        &self,
        token: &str,
    ) -> Result<EmailClaims, AppError> {
        self.parse(token, TokenPurpose::MagicLinkRegistration)
    }

    // ─── Google ──────────────────────────────────────────────────

    pub fn sign_google_state(&self) -> Result<String, AppError> {
        let (iat, exp) = Self::window(Duration::minutes(GOOGLE_TTL_MINUTES));
        self.sign(&GoogleStateClaims {
            nonce: Uuid::new_v4().to_string(),
            purpose: TokenPurpose::GoogleAuthLink,
            iss: ISSUER.to_string(),
            iat,
            exp,
        })
    }

    pub fn parse_google_state(&self, token: &str) -> Result<GoogleStateClaims, AppError> {
        self.parse(token, TokenPurpose::GoogleAuthLink)
    }

    pub fn sign_google_registration_token(
        &self,
        profile: &GoogleRegistration<'_>,
    ) -> Result<String, AppError> {
        let (iat, exp) = Self::window(Duration::minutes(GOOGLE_TTL_MINUTES));
        self.sign(&GoogleRegistrationClaims {
            sub: profile.email.to_string(),
            google_id: profile.google_id.to_string(),
            first_name: profile.first_name.to_string(),
            last_name: profile.last_name.to_string(),
            purpose: TokenPurpose::GoogleRegistration,
            iss: ISSUER.to_string(),
            iat,
            exp,
        })
    }

    pub fn parse_google_registration_token(
        &self,
        token: &str,
    ) -> Result<GoogleRegistrationClaims, AppError> {
        self.parse(token, TokenPurpose::GoogleRegistration)
    }

    // ─── Email change ────────────────────────────────────────────

    pub fn sign_email_change_token(&self, user_id: Uuid, email: &str) -> Result<String, AppError> {
        let (iat, exp) = Self::window(Duration::hours(EMAIL_CHANGE_TTL_HOURS));
        self.sign(&EmailChangeClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            purpose: TokenPurpose::UpdateEmail,
            iss: ISSUER.to_string(),
            iat,
            exp,
        })
    }

    pub fn parse_email_change_token(&self, token: &str) -> Result<EmailChangeClaims, AppError> {
        self.parse(token, TokenPurpose::UpdateEmail)
    }
}
