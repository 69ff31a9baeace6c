// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.
//!
//! Every error crossing the HTTP boundary is rendered as
//! `{ "id": <correlation id>, "status": <code>, "title": <kind> }`.
//! Detail is logged server-side under the same correlation id and never
//! serialized.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;

use crate::db::StoreError;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("User not found")]
    UserNotFound,

    #[error("License not found")]
    LicenseNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Plan not found")]
    PlanNotFound,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Billing provider error: {0}")]
    Billing(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error kind.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::UserNotFound
            | AppError::LicenseNotFound
            | AppError::SubscriptionNotFound
            | AppError::PlanNotFound => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Billing(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Mail(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable title.
    pub fn title(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::UserNotFound => "user_not_found",
            AppError::LicenseNotFound => "license_not_found",
            AppError::SubscriptionNotFound => "subscription_not_found",
            AppError::PlanNotFound => "plan_not_found",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::Database(_) => "database_error",
            AppError::Billing(_) => "billing_provider_error",
            AppError::Mail(_) => "mail_error",
            AppError::Internal(_) => "internal_server_error",
        }
    }

    /// Shorthand for an internal error from a message.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        AppError::Internal(anyhow::anyhow!("{msg}"))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(what) => AppError::AlreadyExists(what.to_string()),
            StoreError::NotFound(what) => AppError::Database(format!("{what} not found")),
            StoreError::Backend(msg) => AppError::Database(msg),
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    id: String,
    status: u16,
    title: &'static str,
}

/// Random correlation id tying a response to its server-side log line.
fn correlation_id() -> String {
    let mut bytes = [0u8; 8];
    if SystemRandom::new().fill(&mut bytes).is_err() {
        return "unavailable".to_string();
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let title = self.title();
        let id = correlation_id();

        match status.as_u16() {
            500.. => tracing::error!(error_id = %id, title, error = ?self, "Request failed"),
            401 => tracing::info!(error_id = %id, title, error = %self, "Request failed"),
            _ => tracing::warn!(error_id = %id, title, error = %self, "Request failed"),
        }

        let body = ErrorResponse {
            id,
            status: status.as_u16(),
            title,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_map_to_already_exists() {
        let err: AppError = StoreError::AlreadyExists("user email").into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.title(), "already_exists");

        let err: AppError = StoreError::Backend("deadline exceeded".into()).into();
        assert_eq!(err.title(), "database_error");
    }

    #[test]
    fn correlation_ids_are_distinct() {
        let a = correlation_id();
        let b = correlation_id();
        assert_eq!(a.len(), 11);
        assert_ne!(a, b);
    }
}
