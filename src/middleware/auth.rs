// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication middleware.
//!
//! Browser sessions authenticate with the access-token cookie plus the XSRF
//! header; desktop clients authenticate with their license key as a bearer
//! token.

use crate::error::AppError;
use crate::models::{License, User};
use crate::routes::cookies::{ACCESS_TOKEN_COOKIE, XSRF_HEADER, XSRF_SAME_SITE_COOKIE};
use crate::services::secrets;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

/// Authenticated user, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

/// License presented by a client, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct LicenseAuth {
    pub license: License,
}

/// Middleware that requires a valid cookie session.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let xsrf_header = request
        .headers()
        .get(XSRF_HEADER)
        .and_then(|h| h.to_str().ok());

    let user = state
        .sessions
        .authenticate_request(
            xsrf_header,
            jar.get(XSRF_SAME_SITE_COOKIE).map(|c| c.value()),
            jar.get(ACCESS_TOKEN_COOKIE).map(|c| c.value()),
        )
        .await?;

    request.extensions_mut().insert(AuthUser { user });
    Ok(next.run(request).await)
}

/// Middleware that requires `Authorization: Bearer <license key>`.
pub async fn require_license(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("missing license key".into()))?;

    let license = state
        .db
        .license_by_key_hash(&secrets::hash_license_key(key))
        .await?
        .ok_or_else(|| AppError::Unauthenticated("unknown license key".into()))?;

    request.extensions_mut().insert(LicenseAuth { license });
    Ok(next.run(request).await)
}
