// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod billing;
pub mod encryption;
pub mod identity;
pub mod mail;
pub mod secrets;
pub mod session;
pub mod stripe;
pub mod tokens;

pub use billing::{BillingProvider, BillingService, EventOutcome};
pub use encryption::EncryptionService;
pub use identity::{GoogleOAuthClient, IdentityProfile, IdentityProvider};
pub use mail::{LogMailer, MailMessage, Mailer, ResendMailer};
pub use session::{AuthOutcome, SessionService, SessionSettings, SessionTokens};
pub use stripe::StripeClient;
pub use tokens::TokenService;
