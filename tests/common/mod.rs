// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use license_portal::config::Config;
use license_portal::db::{FirestoreDb, MemoryDb};
use license_portal::error::AppError;
use license_portal::models::Plan;
use license_portal::routes::create_router;
use license_portal::services::billing::{CheckoutRequest, SubscriptionItemUpdate};
use license_portal::services::{
    BillingProvider, IdentityProfile, IdentityProvider, MailMessage, Mailer,
};
use license_portal::AppState;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Check if emulator is available via environment variable.
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

// ─── Mock collaborators ──────────────────────────────────────────

/// Calls made against the billing provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingCall {
    ItemLookup(String),
    UpdateItem(String, SubscriptionItemUpdate),
    Cancel(String),
    Checkout(CheckoutRequest),
    Portal(String),
}

#[derive(Default)]
pub struct MockBilling {
    pub calls: Mutex<Vec<BillingCall>>,
    pub fail_updates: AtomicBool,
}

impl MockBilling {
    pub fn calls(&self) -> Vec<BillingCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BillingCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BillingProvider for MockBilling {
    async fn subscription_item_id(&self, subscription_id: &str) -> Result<String, AppError> {
        self.record(BillingCall::ItemLookup(subscription_id.to_string()));
        Ok(format!("si_{}", subscription_id))
    }

    async fn update_subscription_item(
        &self,
        item_id: &str,
        update: SubscriptionItemUpdate,
    ) -> Result<(), AppError> {
        self.record(BillingCall::UpdateItem(item_id.to_string(), update));
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(AppError::Billing("stripe unavailable".into()));
        }
        Ok(())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), AppError> {
        self.record(BillingCall::Cancel(subscription_id.to_string()));
        Ok(())
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<String, AppError> {
        self.record(BillingCall::Checkout(request));
        Ok("https://checkout.stripe.test/session".to_string())
    }

    async fn create_portal_session(
        &self,
        customer_id: &str,
        _return_url: &str,
    ) -> Result<String, AppError> {
        self.record(BillingCall::Portal(customer_id.to_string()));
        Ok("https://billing.stripe.test/portal".to_string())
    }
}

#[derive(Default)]
pub struct MockMailer {
    pub sent: Mutex<Vec<MailMessage>>,
}

impl MockMailer {
    pub fn last_to(&self, to: &str) -> Option<MailMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.to.iter().any(|t| t == to))
            .cloned()
    }

    /// Token embedded in the most recent link mailed to `to`.
    pub fn last_token_to(&self, to: &str) -> String {
        let message = self.last_to(to).expect("no mail sent");
        let start = message.body.find("token=").expect("no token in mail") + "token=".len();
        let token: String = message.body[start..]
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();
        urlencoding::decode(&token).unwrap().into_owned()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Identity provider that knows a fixed set of authorization codes.
#[derive(Default)]
pub struct MockIdentity {
    pub profiles: Mutex<HashMap<String, IdentityProfile>>,
}

impl MockIdentity {
    pub fn add(&self, code: &str, id: &str, email: &str, given: &str, family: &str) {
        self.profiles.lock().unwrap().insert(
            code.to_string(),
            IdentityProfile {
                id: id.to_string(),
                email: email.to_string(),
                given_name: given.to_string(),
                family_name: family.to_string(),
            },
        );
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://accounts.google.test/auth?state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<IdentityProfile, AppError> {
        self.profiles
            .lock()
            .unwrap()
            .get(code)
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("authorization code rejected".into()))
    }
}

// ─── Test app ────────────────────────────────────────────────────

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub db: MemoryDb,
    pub billing: Arc<MockBilling>,
    pub mailer: Arc<MockMailer>,
    pub identity: Arc<MockIdentity>,
    pub basic_plan: Plan,
    pub pro_plan: Plan,
}

fn plan(name: &str, price: i64, price_id: &str) -> Plan {
    let now = Utc::now();
    Plan {
        id: uuid::Uuid::new_v4(),
        name: name.to_string(),
        price,
        stripe_price_id: price_id.to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Create a test app over an in-memory store and mock providers.
pub async fn create_test_app() -> TestApp {
    create_test_app_with_config(Config::test_default()).await
}

pub async fn create_test_app_with_config(config: Config) -> TestApp {
    let db = MemoryDb::new();
    let basic_plan = plan("Basic", 1000, "price_basic");
    let pro_plan = plan("Pro", 3000, "price_pro");
    db.insert_plan(basic_plan.clone()).await;
    db.insert_plan(pro_plan.clone()).await;

    let billing = Arc::new(MockBilling::default());
    let mailer = Arc::new(MockMailer::default());
    let identity = Arc::new(MockIdentity::default());

    let state = Arc::new(
        AppState::new(
            config,
            Arc::new(db.clone()),
            billing.clone(),
            mailer.clone(),
            identity.clone(),
        )
        .expect("state"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        billing,
        mailer,
        identity,
        basic_plan,
        pro_plan,
    }
}

// ─── HTTP helpers ────────────────────────────────────────────────

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` pairs from `Set-Cookie` headers.
    pub fn cookies(&self) -> HashMap<String, String> {
        self.set_cookie_headers()
            .iter()
            .filter_map(|c| {
                let pair = c.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    /// Full `Set-Cookie` line for one cookie.
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.set_cookie_headers()
            .into_iter()
            .find(|c| c.starts_with(&prefix))
    }
}

pub async fn send(app: &TestApp, request: Request<Body>) -> TestResponse {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Browser session held by a test.
#[derive(Debug, Clone)]
pub struct Session {
    pub cookies: HashMap<String, String>,
}

impl Session {
    pub fn xsrf(&self) -> &str {
        &self.cookies["xsrf_token"]
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Request carrying session cookies and the XSRF header.
    pub fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, self.cookie_header())
            .header("X-XSRF-TOKEN", self.xsrf());
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }
}

/// Register `email` through the magic-link flow and return its session.
pub async fn register(app: &TestApp, email: &str, first: &str, last: &str) -> Session {
    let res = send(
        app,
        json_request(
            Method::POST,
            "/api/v1/auth/magic/request",
            serde_json::json!({ "email": email }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    let token = app.mailer.last_token_to(email);
    let res = send(
        app,
        json_request(
            Method::POST,
            "/api/v1/auth/magic/authenticate",
            serde_json::json!({ "token": token }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let registration_token = res.body["registrationToken"].as_str().unwrap().to_string();

    let res = send(
        app,
        json_request(
            Method::POST,
            "/api/v1/auth/magic/register",
            serde_json::json!({
                "token": registration_token,
                "firstName": first,
                "lastName": last,
            }),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    Session {
        cookies: res.cookies(),
    }
}

/// Fetch `/users/me` and return the license key.
pub async fn license_key(app: &TestApp, session: &Session) -> String {
    let res = send(app, session.request(Method::GET, "/api/v1/users/me", None)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    res.body["user"]["license"]["key"]
        .as_str()
        .unwrap()
        .to_string()
}
