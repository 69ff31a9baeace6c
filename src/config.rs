//! Application configuration loaded from environment variables.
//!
//! Secrets (signing key, encryption key, provider credentials) are read once
//! at startup and handed to each service's constructor.

use std::env;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Staging,
    Prod,
}

impl Environment {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(ConfigError::Invalid("ENV")),
        }
    }
}

/// Which entitlement store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    Memory,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    pub env: Environment,
    /// Public URL of the portal frontend; links in emails point here.
    pub base_url: String,
    /// Domain attribute for session cookies.
    pub cookie_domain: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    pub store: StoreBackend,
    /// Sender address for outgoing mail.
    pub mail_from: String,
    pub trial_period_days: i64,
    pub google_client_id: String,

    // --- Secrets ---
    /// JWT signing key for all bearer tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Master secret the license-key encryption key is derived from.
    pub encryption_key: Vec<u8>,
    pub google_client_secret: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Resend API key. When absent, mail is logged instead of sent.
    pub resend_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let encryption_key = required("ENCRYPTION_KEY")?.into_bytes();
        if encryption_key.len() < 32 {
            return Err(ConfigError::Invalid("ENCRYPTION_KEY"));
        }

        Ok(Self {
            env: Environment::parse(&env::var("ENV").unwrap_or_default())?,
            base_url: env::var("BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            cookie_domain: env::var("COOKIE_DOMAIN").unwrap_or_else(|_| "localhost".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT"))?,
            store: match env::var("STORE").as_deref() {
                Ok("memory") => StoreBackend::Memory,
                Ok("firestore") | Err(_) => StoreBackend::Firestore,
                Ok(_) => return Err(ConfigError::Invalid("STORE")),
            },
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| "noreply@localhost".to_string()),
            trial_period_days: env::var("TRIAL_PERIOD_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("TRIAL_PERIOD_DAYS"))?,
            google_client_id: required("GOOGLE_CLIENT_ID")?,

            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),
            encryption_key,
            google_client_secret: required("GOOGLE_CLIENT_SECRET")?,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            resend_api_key: env::var("RESEND_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    /// Deterministic config for tests.
    pub fn test_default() -> Self {
        Self {
            env: Environment::Prod,
            base_url: "https://portal.test".to_string(),
            cookie_domain: "portal.test".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            store: StoreBackend::Memory,
            mail_from: "noreply@portal.test".to_string(),
            trial_period_days: 14,
            google_client_id: "test_client_id".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            encryption_key: b"test_encryption_secret_32_bytes!!".to_vec(),
            google_client_secret: "test_client_secret".to_string(),
            stripe_secret_key: "sk_test_123".to_string(),
            stripe_webhook_secret: "whsec_test".to_string(),
            resend_api_key: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.env == Environment::Local
    }

    /// Lifetime of the access token. Local development keeps sessions for a year.
    pub fn auth_token_ttl(&self) -> chrono::Duration {
        if self.is_local() {
            chrono::Duration::days(365)
        } else {
            chrono::Duration::hours(1)
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
