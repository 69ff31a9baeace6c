// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session lifecycle.
//!
//! Login paths (magic link, Google, refresh) all end in the same
//! [`SessionTokens`]: an access JWT embedding an XSRF token, the XSRF token
//! itself, and the refresh token. The route layer turns these into cookies.
//! First-time identities get a short-lived registration token instead; the
//! account, license and trial subscription are created together when that
//! token is redeemed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::Database;
use crate::error::AppError;
use crate::models::{Subscription, User};
use crate::services::encryption::EncryptionService;
use crate::services::identity::IdentityProvider;
use crate::services::mail::{self, Mailer};
use crate::services::secrets;
use crate::services::tokens::{GoogleRegistration, TokenService};

/// Credentials for an established session.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    /// Plaintext refresh token; only its hash is stored.
    pub refresh_token: String,
    pub xsrf_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of presenting a login credential.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Unknown identity: redeem this token to register.
    Registration { registration_token: String },
    Authenticated(SessionTokens),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicLinkRequested {
    pub email: String,
    pub is_new: bool,
}

/// Profile for a new account.
struct NewAccount<'a> {
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    google_id: Option<&'a str>,
}

/// Constant-time string comparison.
pub(crate) fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Clone)]
pub struct SessionService {
    db: Arc<dyn Database>,
    tokens: TokenService,
    encryption: EncryptionService,
    mailer: Arc<dyn Mailer>,
    identity: Arc<dyn IdentityProvider>,
    base_url: String,
    mail_from: String,
    auth_ttl: chrono::Duration,
    trial_period_days: i64,
}

pub struct SessionSettings {
    pub base_url: String,
    pub mail_from: String,
    pub auth_ttl: chrono::Duration,
    pub trial_period_days: i64,
}

impl SessionService {
    pub fn new(
        db: Arc<dyn Database>,
        tokens: TokenService,
        encryption: EncryptionService,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            db,
            tokens,
            encryption,
            mailer,
            identity,
            base_url: settings.base_url,
            mail_from: settings.mail_from,
            auth_ttl: settings.auth_ttl,
            trial_period_days: settings.trial_period_days,
        }
    }

    // ─── Magic link ──────────────────────────────────────────────

    /// Email a login link. Creates no session and writes nothing.
    ///
    /// The response reveals whether the email is registered.
    pub async fn request_magic_link(&self, email: &str) -> Result<MagicLinkRequested, AppError> {
        let existing = self.db.user_by_email(email).await?;
        let greeting = existing
            .as_ref()
            .map(|u| u.first_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("there");

        let token = self.tokens.sign_magic_link_token(email)?;
        let url = format!(
            "{}/auth/magic/authenticate?token={}",
            self.base_url,
            urlencoding::encode(&token)
        );
        self.mailer
            .send(mail::magic_link_message(&self.mail_from, email, greeting, &url))
            .await?;

        tracing::info!(email, is_new = existing.is_none(), "Magic link sent");
        Ok(MagicLinkRequested {
            email: email.to_string(),
            is_new: existing.is_none(),
        })
    }

    pub async fn authenticate_magic_link(&self, token: &str) -> Result<AuthOutcome, AppError> {
        let claims = self.tokens.parse_magic_link_token(token)?;
        match self.db.user_by_email(&claims.sub).await? {
            Some(user) => Ok(AuthOutcome::Authenticated(self.login(user, None).await?)),
            None => Ok(AuthOutcome::Registration {
                registration_token: self
                    .tokens
                    .sign_magic_link_registration_token(&claims.sub)?,
            }),
        }
    }

    pub async fn register_with_magic_link(
        &self,
        token: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<SessionTokens, AppError> {
        let claims = self.tokens.parse_magic_link_registration_token(token)?;
        self.create_account(NewAccount {
            email: &claims.sub,
            first_name,
            last_name,
            google_id: None,
        })
        .await
    }

    // ─── Google ──────────────────────────────────────────────────

    /// Consent URL carrying a signed `state`.
    pub fn google_auth_url(&self) -> Result<String, AppError> {
        let state = self.tokens.sign_google_state()?;
        Ok(self.identity.authorization_url(&state))
    }

    pub async fn authenticate_with_google(
        &self,
        code: &str,
        state: &str,
    ) -> Result<AuthOutcome, AppError> {
        // Forged or stale state is rejected before the code is spent.
        self.tokens.parse_google_state(state)?;
        let profile = self.identity.exchange_code(code).await?;

        match self.db.user_by_email(&profile.email).await? {
            Some(user) => Ok(AuthOutcome::Authenticated(
                self.login(user, Some(&profile.id)).await?,
            )),
            None => Ok(AuthOutcome::Registration {
                registration_token: self.tokens.sign_google_registration_token(
                    &GoogleRegistration {
                        email: &profile.email,
                        google_id: &profile.id,
                        first_name: &profile.given_name,
                        last_name: &profile.family_name,
                    },
                )?,
            }),
        }
    }

    pub async fn register_with_google(&self, token: &str) -> Result<SessionTokens, AppError> {
        let claims = self.tokens.parse_google_registration_token(token)?;
        if self.db.user_email_exists(&claims.sub).await? {
            return Err(AppError::AlreadyExists("email already registered".into()));
        }
        self.create_account(NewAccount {
            email: &claims.sub,
            first_name: &claims.first_name,
            last_name: &claims.last_name,
            google_id: Some(&claims.google_id),
        })
        .await
    }

    // ─── Refresh and request authentication ──────────────────────

    /// Mint a new access token and XSRF token from the refresh cookie.
    ///
    /// The refresh token itself is kept.
    pub async fn refresh(
        &self,
        xsrf_header: Option<&str>,
        xsrf_cookie: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<SessionTokens, AppError> {
        let (Some(header), Some(cookie), Some(refresh_token)) =
            (xsrf_header, xsrf_cookie, refresh_token)
        else {
            return Err(AppError::Unauthenticated("missing refresh credentials".into()));
        };
        if header.is_empty() || refresh_token.is_empty() || !tokens_match(header, cookie) {
            return Err(AppError::Unauthenticated("xsrf token mismatch".into()));
        }

        let hash = secrets::hash_refresh_token(refresh_token);
        let user = self
            .db
            .user_by_refresh_token_hash(&hash)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("unknown refresh token".into()))?;

        self.issue(user.id, refresh_token.to_string())
    }

    /// Resolve the user behind an authenticated request.
    ///
    /// The XSRF header must match either the same-site cookie or the claim
    /// embedded in the access token.
    pub async fn authenticate_request(
        &self,
        xsrf_header: Option<&str>,
        xsrf_cookie: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<User, AppError> {
        let (Some(header), Some(cookie), Some(access_token)) =
            (xsrf_header, xsrf_cookie, access_token)
        else {
            return Err(AppError::Unauthenticated("missing session credentials".into()));
        };
        if header.is_empty() || cookie.is_empty() {
            return Err(AppError::Unauthenticated("empty xsrf token".into()));
        }

        let claims = self.tokens.parse_auth_token(access_token)?;
        if claims.xsrf_token.is_empty() {
            return Err(AppError::Unauthenticated("token has no xsrf claim".into()));
        }
        if !tokens_match(header, cookie) && !tokens_match(header, &claims.xsrf_token) {
            return Err(AppError::Unauthenticated("xsrf token mismatch".into()));
        }

        self.db
            .user_by_id(claims.user_id()?)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("session user no longer exists".into()))
    }

    // ─── Email change ────────────────────────────────────────────

    /// Mail a confirmation link to the new address.
    pub async fn request_email_change(
        &self,
        user: &User,
        email: &str,
        confirmation: &str,
    ) -> Result<(), AppError> {
        if email != confirmation {
            return Err(AppError::InvalidArgument(
                "email and confirmation do not match".into(),
            ));
        }
        if email == user.email {
            return Err(AppError::InvalidArgument("email is unchanged".into()));
        }
        if self.db.user_email_exists(email).await? {
            return Err(AppError::AlreadyExists("email already registered".into()));
        }

        let token = self.tokens.sign_email_change_token(user.id, email)?;
        let url = format!(
            "{}/users/email/update/confirm?token={}",
            self.base_url,
            urlencoding::encode(&token)
        );
        self.mailer
            .send(mail::email_change_message(
                &self.mail_from,
                email,
                &user.first_name,
                &url,
            ))
            .await?;

        tracing::info!(user_id = %user.id, "Email change requested");
        Ok(())
    }

    /// Apply a confirmed email change.
    ///
    /// The Google link is dropped since it was tied to the old address.
    pub async fn confirm_email_change(&self, user: &User, token: &str) -> Result<User, AppError> {
        let claims = self.tokens.parse_email_change_token(token)?;
        if claims.user_id()? != user.id {
            return Err(AppError::PermissionDenied(
                "token was issued to another user".into(),
            ));
        }
        if claims.email != user.email && self.db.user_email_exists(&claims.email).await? {
            return Err(AppError::AlreadyExists("email already registered".into()));
        }

        let mut updated = user.clone();
        updated.email = claims.email;
        updated.google_id = None;
        updated.updated_at = Utc::now();

        let mut tx = self.db.begin().await?;
        tx.update_user(&updated).await?;
        tx.commit().await?;

        tracing::info!(user_id = %updated.id, "Email changed");
        Ok(updated)
    }

    // ─── Internals ───────────────────────────────────────────────

    /// Sign a fresh access token and XSRF token around `refresh_token`.
    fn issue(&self, user_id: Uuid, refresh_token: String) -> Result<SessionTokens, AppError> {
        let xsrf_token = secrets::generate_xsrf_token();
        let expires_at = Utc::now() + self.auth_ttl;
        let access_token = self
            .tokens
            .sign_auth_token(user_id, &xsrf_token, expires_at)?;
        Ok(SessionTokens {
            access_token,
            refresh_token,
            xsrf_token,
            expires_at,
        })
    }

    /// Existing user: rotate the refresh token and start a session.
    /// `google_id` is stored if the account has none yet.
    async fn login(&self, mut user: User, google_id: Option<&str>) -> Result<SessionTokens, AppError> {
        let refresh = secrets::generate_refresh_token()?;
        let session = self.issue(user.id, refresh.plaintext)?;

        user.refresh_token_hash = Some(refresh.hash);
        if let (None, Some(google_id)) = (&user.google_id, google_id) {
            user.google_id = Some(google_id.to_string());
            tracing::info!(user_id = %user.id, "Linked Google account");
        }
        user.updated_at = Utc::now();

        let mut tx = self.db.begin().await?;
        tx.update_user(&user).await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "User logged in");
        Ok(session)
    }

    /// Create user, license and trial subscription in one transaction.
    async fn create_account(&self, account: NewAccount<'_>) -> Result<SessionTokens, AppError> {
        let now = Utc::now();
        let refresh = secrets::generate_refresh_token()?;
        let license_key = secrets::generate_license_key()?;

        let mut user = User::new(account.email, account.first_name, account.last_name, now);
        user.google_id = account.google_id.map(str::to_string);
        user.refresh_token_hash = Some(refresh.hash);

        let license = self.encryption.seal_license(user.id, &license_key)?;
        let subscription = Subscription::new_trial(user.id, now, self.trial_period_days);
        let session = self.issue(user.id, refresh.plaintext)?;

        let mut tx = self.db.begin().await?;
        let staged = async {
            tx.create_user(&user).await?;
            tx.create_license(&license).await?;
            tx.create_subscription(&subscription).await?;
            Ok::<_, AppError>(())
        }
        .await;
        if let Err(e) = staged {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Registration rollback failed");
            }
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!(user_id = %user.id, email = %user.email, "User registered");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_compares_whole_value() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
        assert!(!tokens_match("", "a"));
    }
}
