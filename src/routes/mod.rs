// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod auth;
pub mod cookies;
pub mod extract;
pub mod license;
pub mod plans;
pub mod stripe;
pub mod subscriptions;
pub mod users;

use crate::middleware::{require_auth, require_license};
use crate::AppState;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
pub struct HealthResponse {
    pub status: String,
}

/// Generic acknowledgement body.
#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "frontend/src/api/generated/")
)]
pub struct StatusResponse {
    pub code: u16,
    pub message: String,
}

impl StatusResponse {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            code: status.as_u16(),
            message: message.to_string(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK, "ok")
    }
}

/// Health check response
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer - allow requests from the portal frontend and localhost (for dev)
    let base_url = state.config.base_url.clone();
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(
            move |origin: &axum::http::HeaderValue, _request_parts: &axum::http::request::Parts| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == base_url
                    || origin_str.starts_with("http://localhost")
                    || origin_str.starts_with("http://127.0.0.1")
            },
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(cookies::XSRF_HEADER),
        ]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .merge(auth::routes())
        .merge(plans::routes())
        .merge(stripe::webhook_routes());

    // Cookie session required
    let session_routes = Router::new()
        .merge(users::routes())
        .merge(subscriptions::routes())
        .merge(stripe::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // License key required
    let license_routes = license::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_license));

    let v1 = Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(license_routes);

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/v1", v1)
        .layer(middleware::from_fn(
            crate::middleware::security::add_security_headers,
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
