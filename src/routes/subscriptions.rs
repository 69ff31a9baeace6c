// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscription routes for the signed-in user.

use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::AuthUser;
use crate::models::{Plan, Subscription};
use crate::routes::extract::ValidatedJson;
use crate::routes::plans::PlanResponse;
use crate::routes::StatusResponse;
use crate::time_utils::unix_string;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/subscriptions", get(get_subscription))
        .route("/subscriptions/upgrade", post(upgrade))
        .route("/subscriptions/cancel", post(cancel))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: String,
    pub user_id: String,
    pub plan_id: Option<String>,
    pub status: String,
    pub seat_count: i64,
    pub trial_start: String,
    pub trial_end: String,
    pub created_at: String,
    pub updated_at: String,
    pub plan: Option<PlanResponse>,
}

impl SubscriptionResponse {
    fn new(sub: &Subscription, plan: Option<&Plan>) -> Self {
        Self {
            id: sub.id.to_string(),
            user_id: sub.user_id.to_string(),
            plan_id: sub.plan_id.map(|id| id.to_string()),
            status: sub.status.to_string(),
            seat_count: sub.seat_count,
            trial_start: unix_string(sub.trial_start),
            trial_end: unix_string(sub.trial_end),
            created_at: unix_string(sub.created_at),
            updated_at: unix_string(sub.updated_at),
            plan: plan.map(PlanResponse::from),
        }
    }
}

#[derive(Serialize)]
pub struct SubscriptionEnvelope {
    pub subscription: SubscriptionResponse,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub plan_id: Uuid,
}

async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<SubscriptionEnvelope>> {
    let sub = state
        .db
        .subscription_by_user_id(auth.user.id)
        .await?
        .ok_or(AppError::SubscriptionNotFound)?;
    let plan = match sub.plan_id {
        Some(plan_id) => state.db.plan_by_id(plan_id).await?,
        None => None,
    };
    Ok(Json(SubscriptionEnvelope {
        subscription: SubscriptionResponse::new(&sub, plan.as_ref()),
    }))
}

async fn upgrade(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<PlanRequest>,
) -> Result<Json<StatusResponse>> {
    state.billing.upgrade(&auth.user, req.plan_id).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<StatusResponse>> {
    state.billing.cancel(&auth.user).await?;
    Ok(Json(StatusResponse::ok()))
}
