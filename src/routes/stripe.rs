// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stripe routes: webhook receiver, checkout and customer portal.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::Result;
use crate::middleware::AuthUser;
use crate::routes::extract::ValidatedJson;
use crate::routes::subscriptions::PlanRequest;
use crate::routes::StatusResponse;
use crate::services::EventOutcome;
use crate::AppState;

/// Largest webhook body accepted.
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Webhook receiver, authenticated by signature.
pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stripe/webhook", post(handle_webhook))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT))
}

/// Session-authenticated Stripe routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stripe/createCheckoutSession", post(create_checkout_session))
        .route("/stripe/customerPortalUrl", get(customer_portal_url))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
pub struct UrlResponse {
    pub url: String,
}

/// Receive a Stripe event.
///
/// A bad signature is rejected with 400. Anything past that is acknowledged
/// with 200 even if applying the event failed, so Stripe does not retry.
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<StatusResponse>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let event = match state.billing.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected Stripe webhook");
            return (
                StatusCode::BAD_REQUEST,
                Json(StatusResponse::new(
                    StatusCode::BAD_REQUEST,
                    "invalid signature",
                )),
            );
        }
    };

    if let EventOutcome::Skipped(reason) = state.billing.handle_event(&event).await {
        tracing::debug!(event_id = %event.id, %reason, "Stripe event not applied");
    }
    (StatusCode::OK, Json(StatusResponse::ok()))
}

async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<PlanRequest>,
) -> Result<Json<UrlResponse>> {
    let url = state.billing.checkout_url(&auth.user, req.plan_id).await?;
    Ok(Json(UrlResponse { url }))
}

async fn customer_portal_url(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UrlResponse>> {
    let url = state.billing.portal_url(&auth.user).await?;
    Ok(Json(UrlResponse { url }))
}
