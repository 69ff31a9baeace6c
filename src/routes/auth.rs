// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-in routes: magic link, Google, refresh and logout.

use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

use crate::error::Result;
use crate::routes::cookies::{
    CookieSettings, REFRESH_TOKEN_COOKIE, XSRF_HEADER, XSRF_SAME_SITE_COOKIE,
};
use crate::routes::extract::ValidatedJson;
use crate::routes::StatusResponse;
use crate::services::{AuthOutcome, SessionTokens};
use crate::time_utils::unix_string;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/magic/request", post(request_magic_link))
        .route("/auth/magic/authenticate", post(authenticate_magic_link))
        .route("/auth/magic/register", post(register_magic_link))
        .route("/auth/google/request", post(request_google_link))
        .route("/auth/google/authenticate", post(authenticate_google))
        .route("/auth/google/register", post(register_google))
        .route("/auth/refreshToken", post(refresh_token))
        .route("/auth/logout", post(logout))
}

#[derive(Deserialize, Validate)]
pub struct MagicLinkRequest {
    #[validate(email)]
    email: String,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkResponse {
    pub email: String,
    pub is_new: bool,
}

#[derive(Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 1))]
    token: String,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkRegisterRequest {
    #[validate(length(min = 1))]
    token: String,
    #[validate(length(min = 1, max = 255))]
    first_name: String,
    #[validate(length(min = 1, max = 255))]
    last_name: String,
}

/// Result of presenting a login credential. New users get a
/// `registrationToken` and no cookies; known users get a session.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub is_new_user: bool,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Unix seconds
    pub expires_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLinkResponse {
    pub auth_url: String,
}

#[derive(Deserialize, Validate)]
pub struct GoogleAuthenticateRequest {
    #[validate(length(min = 1))]
    code: String,
    #[validate(length(min = 1))]
    state: String,
}

fn start_session(
    state: &AppState,
    jar: CookieJar,
    session: &SessionTokens,
) -> (CookieJar, Json<SessionResponse>) {
    let jar = CookieSettings::from_config(&state.config).set_session(jar, session);
    (
        jar,
        Json(SessionResponse {
            expires_at: unix_string(session.expires_at),
        }),
    )
}

fn authenticate_response(
    state: &AppState,
    jar: CookieJar,
    outcome: AuthOutcome,
) -> (CookieJar, Json<AuthenticateResponse>) {
    match outcome {
        AuthOutcome::Registration { registration_token } => (
            jar,
            Json(AuthenticateResponse {
                registration_token: Some(registration_token),
                expires_at: None,
                is_new_user: true,
            }),
        ),
        AuthOutcome::Authenticated(session) => {
            let (jar, Json(body)) = start_session(state, jar, &session);
            (
                jar,
                Json(AuthenticateResponse {
                    registration_token: None,
                    expires_at: Some(body.expires_at),
                    is_new_user: false,
                }),
            )
        }
    }
}

/// Email a sign-in link.
async fn request_magic_link(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<MagicLinkRequest>,
) -> Result<Json<MagicLinkResponse>> {
    let sent = state.sessions.request_magic_link(&req.email).await?;
    Ok(Json(MagicLinkResponse {
        email: sent.email,
        is_new: sent.is_new,
    }))
}

async fn authenticate_magic_link(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<TokenRequest>,
) -> Result<(CookieJar, Json<AuthenticateResponse>)> {
    let outcome = state.sessions.authenticate_magic_link(&req.token).await?;
    Ok(authenticate_response(&state, jar, outcome))
}

async fn register_magic_link(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<MagicLinkRegisterRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let session = state
        .sessions
        .register_with_magic_link(&req.token, req.first_name.trim(), req.last_name.trim())
        .await?;
    Ok(start_session(&state, jar, &session))
}

async fn request_google_link(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GoogleLinkResponse>> {
    Ok(Json(GoogleLinkResponse {
        auth_url: state.sessions.google_auth_url()?,
    }))
}

async fn authenticate_google(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<GoogleAuthenticateRequest>,
) -> Result<(CookieJar, Json<AuthenticateResponse>)> {
    let outcome = state
        .sessions
        .authenticate_with_google(&req.code, &req.state)
        .await?;
    Ok(authenticate_response(&state, jar, outcome))
}

async fn register_google(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<TokenRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let session = state.sessions.register_with_google(&req.token).await?;
    Ok(start_session(&state, jar, &session))
}

/// Issue a fresh access token from the refresh cookie.
async fn refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let session = state
        .sessions
        .refresh(
            headers.get(XSRF_HEADER).and_then(|h| h.to_str().ok()),
            jar.get(XSRF_SAME_SITE_COOKIE).map(|c| c.value()),
            jar.get(REFRESH_TOKEN_COOKIE).map(|c| c.value()),
        )
        .await?;
    Ok(start_session(&state, jar, &session))
}

/// Clear session cookies. Always succeeds.
async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    let jar = CookieSettings::from_config(&state.config).clear_session(jar);
    (jar, Json(StatusResponse::ok()))
}
