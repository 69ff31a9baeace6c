// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License-key API used by installed clients.

use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::LicenseAuth;
use crate::routes::extract::ValidatedJson;
use crate::time_utils::unix_string;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/license/validate", get(validate))
        .route("/license/seats", post(update_seats))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    pub status: String,
    pub seat_count: i64,
    pub trial_end: String,
}

#[derive(Deserialize, Validate)]
pub struct SeatsRequest {
    /// Signed change in seat count
    #[validate(range(min = -10_000, max = 10_000))]
    seats: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatsResponse {
    pub seat_count: i64,
}

/// Report whether the presented license currently grants access.
async fn validate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<LicenseAuth>,
) -> Result<Json<ValidateResponse>> {
    let sub = state
        .db
        .subscription_by_user_id(auth.license.user_id)
        .await?
        .ok_or(AppError::SubscriptionNotFound)?;

    Ok(Json(ValidateResponse {
        valid: sub.grants_access(Utc::now()),
        status: sub.status.to_string(),
        seat_count: sub.seat_count,
        trial_end: unix_string(sub.trial_end),
    }))
}

async fn update_seats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<LicenseAuth>,
    ValidatedJson(req): ValidatedJson<SeatsRequest>,
) -> Result<Json<SeatsResponse>> {
    let seat_count = state.billing.update_seats(&auth.license, req.seats).await?;
    Ok(Json(SeatsResponse { seat_count }))
}
