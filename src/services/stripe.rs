// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe REST client, webhook signature scheme and event payloads.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::services::billing::{BillingProvider, CheckoutRequest, SubscriptionItemUpdate};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum age of a signed webhook payload.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

// ─── Webhook signatures ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no matching signature")]
    Mismatch,
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

fn signature_hex(payload: &[u8], secret: &str, timestamp: i64) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a `Stripe-Signature` header value for `payload`.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={},v1={}", timestamp, signature_hex(payload, secret, timestamp))
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`).
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
            }
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    let expected = signature_hex(payload, secret, timestamp);
    let matched = candidates
        .iter()
        .any(|c| bool::from(c.as_bytes().ct_eq(expected.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

// ─── Event payloads ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, SignatureError> {
        serde_json::from_slice(payload).map_err(|e| SignatureError::InvalidPayload(e.to_string()))
    }

    /// Deserialize the event's object.
    pub fn object<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            AppError::InvalidArgument(format!("unexpected {} payload: {}", self.event_type, e))
        })
    }
}

/// Reference that Stripe sends either as an id or as the expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) | Expandable::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: ItemList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: Price,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

// ─── REST client ─────────────────────────────────────────────────

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed building Stripe client: {e}")))?;
        Ok(Self {
            http,
            base_url: API_BASE.to_string(),
            secret_key,
        })
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, AppError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Billing(e.to_string()))?;
        Self::check_response_json(response).await
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                tracing::warn!("Stripe rate limit hit (429)");
            }
            return Err(AppError::Billing(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Billing(format!("JSON parse error: {}", e)))
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn subscription_item_id(&self, subscription_id: &str) -> Result<String, AppError> {
        let response = self
            .http
            .get(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::Billing(e.to_string()))?;
        let subscription: StripeSubscription = Self::check_response_json(response).await?;
        subscription
            .items
            .data
            .into_iter()
            .next()
            .map(|item| item.id)
            .ok_or_else(|| AppError::internal("stripe subscription has no items"))
    }

    async fn update_subscription_item(
        &self,
        item_id: &str,
        update: SubscriptionItemUpdate,
    ) -> Result<(), AppError> {
        let mut form = Vec::new();
        if let Some(price_id) = update.price_id {
            form.push(("price", price_id));
        }
        if let Some(quantity) = update.quantity {
            form.push(("quantity", quantity.to_string()));
        }
        let _: serde_json::Value = self
            .post_form(&format!("/subscription_items/{}", item_id), &form)
            .await?;
        tracing::info!(item_id, "Stripe subscription item updated");
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), AppError> {
        let response = self
            .http
            .delete(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| AppError::Billing(e.to_string()))?;
        let _: serde_json::Value = Self::check_response_json(response).await?;
        tracing::info!(subscription_id, "Stripe subscription canceled");
        Ok(())
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, AppError> {
        let mut form = vec![
            ("mode", "subscription".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price]", request.price_id),
            ("line_items[0][quantity]", request.quantity.to_string()),
            ("automatic_tax[enabled]", "true".to_string()),
            ("client_reference_id", request.user_id.to_string()),
            ("subscription_data[metadata][user_id]", request.user_id.to_string()),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
        ];
        if let Some(customer_id) = request.customer_id {
            form.push(("customer", customer_id));
        }
        let session: UrlResponse = self.post_form("/checkout/sessions", &form).await?;
        Ok(session.url)
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, AppError> {
        let form = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        let session: UrlResponse = self.post_form("/billing_portal/sessions", &form).await?;
        Ok(session.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_unit";

    #[test]
    fn valid_signature_accepted() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign_webhook_payload(payload, SECRET, 1_700_000_000);
        assert_eq!(
            verify_webhook_signature(payload, &header, SECRET, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn any_v1_candidate_may_match() {
        let payload = b"{}";
        let good = sign_webhook_payload(payload, SECRET, 100);
        let v1 = good.split_once(",v1=").unwrap().1;
        let header = format!("t=100,v1=deadbeef,v0=abc,v1={}", v1);
        assert!(verify_webhook_signature(payload, &header, SECRET, 100).is_ok());
    }

    #[test]
    fn tampered_payload_rejected() {
        let header = sign_webhook_payload(b"{\"a\":1}", SECRET, 100);
        assert_eq!(
            verify_webhook_signature(b"{\"a\":2}", &header, SECRET, 100),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature(b"{\"a\":1}", &header, "whsec_other", 100),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_signature_rejected() {
        let header = sign_webhook_payload(b"{}", SECRET, 100);
        assert_eq!(
            verify_webhook_signature(b"{}", &header, SECRET, 100 + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn extreme_timestamps_are_expired() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", t);
            assert_eq!(
                verify_webhook_signature(b"{}", &header, SECRET, 100),
                Err(SignatureError::Expired),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn malformed_headers_rejected() {
        for header in ["", "v1=abc", "t=100", "t=abc,v1=00"] {
            assert_eq!(
                verify_webhook_signature(b"{}", header, SECRET, 100),
                Err(SignatureError::Malformed),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn subscription_payload_parses_with_string_customer() {
        let event = WebhookEvent::parse(
            br#"{
                "id": "evt_1",
                "type": "customer.subscription.updated",
                "data": {"object": {
                    "id": "sub_1",
                    "status": "past_due",
                    "customer": "cus_1",
                    "items": {"data": [{"id": "si_1", "price": {"id": "price_1"}, "quantity": 3}]}
                }}
            }"#,
        )
        .unwrap();
        let sub: StripeSubscription = event.object().unwrap();
        assert_eq!(sub.customer.unwrap().id(), "cus_1");
        assert_eq!(sub.items.data[0].price.id, "price_1");
        assert!(sub.metadata.is_empty());
    }
}
