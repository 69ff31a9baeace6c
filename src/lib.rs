// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License portal: accounts, sessions, license keys and billing.
//!
//! This crate provides the backend API for the customer portal: magic-link
//! and Google sign-in with cookie sessions, per-user encrypted license keys,
//! and subscription state reconciled from Stripe.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::Database;
use services::{
    BillingProvider, BillingService, EncryptionService, IdentityProvider, Mailer, SessionService,
    SessionSettings, TokenService,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<dyn Database>,
    pub encryption: EncryptionService,
    pub sessions: SessionService,
    pub billing: BillingService,
}

impl AppState {
    /// Wire services around the given collaborators.
    pub fn new(
        config: Config,
        db: Arc<dyn Database>,
        billing_provider: Arc<dyn BillingProvider>,
        mailer: Arc<dyn Mailer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> error::Result<Self> {
        let tokens = TokenService::new(&config.jwt_signing_key);
        let encryption = EncryptionService::new(&config.encryption_key)?;
        let sessions = SessionService::new(
            db.clone(),
            tokens,
            encryption.clone(),
            mailer,
            identity,
            SessionSettings {
                base_url: config.base_url.clone(),
                mail_from: config.mail_from.clone(),
                auth_ttl: config.auth_token_ttl(),
                trial_period_days: config.trial_period_days,
            },
        );
        let billing = BillingService::new(
            db.clone(),
            billing_provider,
            config.stripe_webhook_secret.clone(),
            &config.base_url,
        );

        Ok(Self {
            config,
            db,
            encryption,
            sessions,
            billing,
        })
    }
}
