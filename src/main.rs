// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License portal API server.
//!
//! Serves sign-in, account, subscription and license-key endpoints and
//! receives Stripe webhooks.

use license_portal::{
    config::{Config, StoreBackend},
    db::{Database, FirestoreDb, MemoryDb},
    services::{
        BillingProvider, GoogleOAuthClient, IdentityProvider, LogMailer, Mailer, ResendMailer,
        StripeClient,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, env = ?config.env, "Starting license portal API");

    let db: Arc<dyn Database> = match config.store {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    let billing: Arc<dyn BillingProvider> =
        Arc::new(StripeClient::new(config.stripe_secret_key.clone())?);

    let mailer: Arc<dyn Mailer> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendMailer::new(api_key.clone())?),
        None => {
            tracing::info!("RESEND_API_KEY not set; outgoing mail is logged");
            Arc::new(LogMailer)
        }
    };

    let identity: Arc<dyn IdentityProvider> = Arc::new(GoogleOAuthClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        &config.base_url,
    )?);

    let port = config.port;
    let state = Arc::new(AppState::new(config, db, billing, mailer, identity)?);

    // Build router
    let app = license_portal::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM (sent by Cloud Run before shutdown).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("license_portal=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
