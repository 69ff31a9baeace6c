// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! License-key API: validation and seat updates.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use license_portal::db::{SubscriptionStore, UserStore};
use license_portal::models::{Subscription, SubscriptionStatus};
use license_portal::services::billing::SubscriptionItemUpdate;
use serde_json::json;
use std::sync::atomic::Ordering;
use uuid::Uuid;

mod common;
use common::{create_test_app, license_key, register, send, BillingCall, TestApp};

fn license_request(method: Method, uri: &str, key: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", key));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Register a user and return (user id, license key).
async fn licensed_user(app: &TestApp, email: &str) -> (Uuid, String) {
    let session = register(app, email, "Lic", "Ense").await;
    let key = license_key(app, &session).await;
    let user_id = app.db.user_by_email(email).await.unwrap().unwrap().id;
    (user_id, key)
}

async fn set_status(app: &TestApp, user_id: Uuid, status: SubscriptionStatus) -> Subscription {
    let mut sub = app.db.subscription_by_user_id(user_id).await.unwrap().unwrap();
    sub.status = status;
    sub.stripe_customer_id = Some("cus_1".into());
    sub.stripe_subscription_id = Some("sub_1".into());
    app.db.update_subscription(&sub).await.unwrap();
    sub
}

async fn seat_count(app: &TestApp, user_id: Uuid) -> i64 {
    app.db
        .subscription_by_user_id(user_id)
        .await
        .unwrap()
        .unwrap()
        .seat_count
}

#[tokio::test]
async fn validate_accepts_key_in_any_format() {
    let app = create_test_app().await;
    let (_, key) = licensed_user(&app, "validate@example.com").await;

    let res = send(&app, license_request(Method::GET, "/api/v1/license/validate", &key, None)).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["valid"], true);
    assert_eq!(res.body["status"], "trial");
    assert_eq!(res.body["seatCount"], 1);

    let reformatted = key.replace('-', "").to_lowercase();
    let res = send(
        &app,
        license_request(Method::GET, "/api/v1/license/validate", &reformatted, None),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn validate_reports_canceled_as_invalid() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "canceled@example.com").await;
    set_status(&app, user_id, SubscriptionStatus::Canceled).await;

    let res = send(&app, license_request(Method::GET, "/api/v1/license/validate", &key, None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["valid"], false);
    assert_eq!(res.body["status"], "canceled");
}

#[tokio::test]
async fn unknown_key_is_unauthenticated() {
    let app = create_test_app().await;
    let res = send(
        &app,
        license_request(Method::GET, "/api/v1/license/validate", "AAAA-BBBB", None),
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = send(
        &app,
        Request::builder()
            .uri("/api/v1/license/validate")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trial_seat_update_is_local_only() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "trialseats@example.com").await;

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": 2 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["seatCount"], 3);
    assert_eq!(seat_count(&app, user_id).await, 3);
    assert!(app.billing.calls().is_empty());
}

#[tokio::test]
async fn active_seat_update_pushes_quantity() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "activeseats@example.com").await;
    set_status(&app, user_id, SubscriptionStatus::Active).await;

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": 4 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(seat_count(&app, user_id).await, 5);
    assert_eq!(
        app.billing.calls(),
        vec![
            BillingCall::ItemLookup("sub_1".into()),
            BillingCall::UpdateItem(
                "si_sub_1".into(),
                SubscriptionItemUpdate {
                    price_id: None,
                    quantity: Some(5),
                }
            ),
        ]
    );
}

#[tokio::test]
async fn past_due_seat_update_rolls_back() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "pastdue@example.com").await;
    set_status(&app, user_id, SubscriptionStatus::PastDue).await;

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": 1 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.body["title"], "internal_server_error");
    assert_eq!(seat_count(&app, user_id).await, 1);
    assert!(app.billing.calls().is_empty());
}

#[tokio::test]
async fn provider_failure_rolls_back_seat_change() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "flaky@example.com").await;
    set_status(&app, user_id, SubscriptionStatus::Active).await;
    app.billing.fail_updates.store(true, Ordering::SeqCst);

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": 1 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY);
    assert_eq!(seat_count(&app, user_id).await, 1);
}

#[tokio::test]
async fn seat_count_cannot_drop_below_one() {
    let app = create_test_app().await;
    let (user_id, key) = licensed_user(&app, "floor@example.com").await;

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": -1 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(seat_count(&app, user_id).await, 1);

    let res = send(
        &app,
        license_request(Method::POST, "/api/v1/license/seats", &key, Some(json!({ "seats": 0 }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}
