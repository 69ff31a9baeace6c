// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Plan catalogue.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::Result;
use crate::models::Plan;
use crate::time_utils::unix_string;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/plans", get(list_plans))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    /// Price in the smallest currency unit
    pub price: i64,
    pub stripe_price_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Plan> for PlanResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.to_string(),
            name: plan.name.clone(),
            price: plan.price,
            stripe_price_id: plan.stripe_price_id.clone(),
            created_at: unix_string(plan.created_at),
            updated_at: unix_string(plan.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct PlansResponse {
    pub plans: Vec<PlanResponse>,
}

async fn list_plans(State(state): State<Arc<AppState>>) -> Result<Json<PlansResponse>> {
    let plans = state.db.list_plans().await?;
    Ok(Json(PlansResponse {
        plans: plans.iter().map(PlanResponse::from).collect(),
    }))
}
