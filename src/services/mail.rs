// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outbound mail.
//!
//! `ResendMailer` delivers through the Resend HTTP API. `LogMailer` only
//! logs, for local development and deployments without a mail key.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RESEND_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), AppError>;
}

/// Resend API client.
#[derive(Clone)]
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

impl ResendMailer {
    pub fn new(api_key: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed building mail client: {e}")))?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        let response = self
            .http
            .post(RESEND_URL)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &message.from,
                to: &message.to,
                subject: &message.subject,
                text: &message.body,
            })
            .send()
            .await
            .map_err(|e| AppError::Mail(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("HTTP {}: {}", status, body)));
        }

        tracing::info!(to = ?message.to, subject = %message.subject, "Mail sent");
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        tracing::info!(to = ?message.to, subject = %message.subject, "Mail not sent (log mailer)");
        tracing::debug!(body = %message.body, "Mail body");
        Ok(())
    }
}

pub fn magic_link_message(from: &str, to: &str, first_name: &str, url: &str) -> MailMessage {
    MailMessage {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: "Log in to your license portal".to_string(),
        body: format!(
            "Hi {first_name},\n\n\
             Use the link below to log in. It expires in 15 minutes.\n\n\
             {url}\n\n\
             If you did not request this email, you can ignore it.\n"
        ),
    }
}

pub fn email_change_message(from: &str, to: &str, first_name: &str, url: &str) -> MailMessage {
    MailMessage {
        from: from.to_string(),
        to: vec![to.to_string()],
        subject: "Confirm your new email address".to_string(),
        body: format!(
            "Hi {first_name},\n\n\
             Confirm your new email address by opening the link below. It \
             expires in 24 hours.\n\n\
             {url}\n\n\
             If you did not request this change, you can ignore this email.\n"
        ),
    }
}
