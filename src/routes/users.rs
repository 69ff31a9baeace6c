// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account routes for the signed-in user.

use axum::{
    extract::State,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

use crate::error::Result;
use crate::middleware::AuthUser;
use crate::models::{License, User};
use crate::routes::extract::ValidatedJson;
use crate::routes::StatusResponse;
use crate::time_utils::{unix_string, unix_string_opt};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/me", get(get_me).put(update_me))
        .route("/users/me/email/instructions", post(request_email_change))
        .route("/users/me/email", put(confirm_email_change))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct LicenseResponse {
    pub id: String,
    pub user_id: String,
    /// Plaintext license key
    pub key: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub scheduled_deletion_at: Option<String>,
    pub license: Option<LicenseResponse>,
}

impl UserResponse {
    fn new(user: &User, license: Option<LicenseResponse>) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            created_at: unix_string(user.created_at),
            updated_at: unix_string(user.updated_at),
            scheduled_deletion_at: unix_string_opt(user.scheduled_deletion_at),
            license,
        }
    }
}

#[derive(Serialize)]
pub struct UserEnvelope {
    pub user: UserResponse,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    #[validate(length(min = 1, max = 255))]
    first_name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    last_name: Option<String>,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailChangeRequest {
    #[validate(email)]
    email: String,
    #[validate(email)]
    email_confirmation: String,
}

#[derive(Deserialize, Validate)]
pub struct EmailChangeConfirmRequest {
    #[validate(length(min = 1))]
    token: String,
}

/// Decrypt the user's license for display. A key that no longer decrypts
/// is logged and omitted rather than failing the whole profile.
fn license_response(state: &AppState, license: Option<License>) -> Option<LicenseResponse> {
    let license = license?;
    match state.encryption.reveal_license(&license) {
        Ok(key) => Some(LicenseResponse {
            id: license.id.to_string(),
            user_id: license.user_id.to_string(),
            key,
        }),
        Err(e) => {
            tracing::warn!(license_id = %license.id, error = %e, "License key failed to decrypt");
            None
        }
    }
}

async fn user_envelope(state: &AppState, user: &User) -> Result<Json<UserEnvelope>> {
    let license = state.db.license_by_user_id(user.id).await?;
    Ok(Json(UserEnvelope {
        user: UserResponse::new(user, license_response(state, license)),
    }))
}

/// Current user with their license key.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<UserEnvelope>> {
    user_envelope(&state, &auth.user).await
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<UpdateMeRequest>,
) -> Result<Json<UserEnvelope>> {
    let mut user = auth.user;
    if let Some(first_name) = req.first_name {
        user.first_name = first_name.trim().to_string();
    }
    if let Some(last_name) = req.last_name {
        user.last_name = last_name.trim().to_string();
    }
    user.updated_at = Utc::now();
    state.db.update_user(&user).await?;

    tracing::info!(user_id = %user.id, "Profile updated");
    user_envelope(&state, &user).await
}

async fn request_email_change(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<EmailChangeRequest>,
) -> Result<Json<StatusResponse>> {
    state
        .sessions
        .request_email_change(&auth.user, &req.email, &req.email_confirmation)
        .await?;
    Ok(Json(StatusResponse::ok()))
}

async fn confirm_email_change(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<EmailChangeConfirmRequest>,
) -> Result<Json<UserEnvelope>> {
    let user = state
        .sessions
        .confirm_email_change(&auth.user, &req.token)
        .await?;
    user_envelope(&state, &user).await
}
