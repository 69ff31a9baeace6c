// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account, subscription and plan routes.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use license_portal::db::{SubscriptionStore, UserStore};
use license_portal::models::SubscriptionStatus;
use license_portal::services::billing::SubscriptionItemUpdate;
use serde_json::json;

mod common;
use common::{create_test_app, register, send, BillingCall};

#[tokio::test]
async fn update_profile_names() {
    let app = create_test_app().await;
    let session = register(&app, "names@example.com", "Old", "Name").await;

    let res = send(
        &app,
        session.request(
            Method::PUT,
            "/api/v1/users/me",
            Some(json!({ "firstName": "New" })),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["user"]["firstName"], "New");
    assert_eq!(res.body["user"]["lastName"], "Name");
    assert!(res.body["user"]["license"]["key"].is_string());

    let res = send(
        &app,
        session.request(Method::PUT, "/api/v1/users/me", Some(json!({ "lastName": "" }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn email_change_round_trip_clears_google_link() {
    let app = create_test_app().await;
    let session = register(&app, "before@example.com", "E", "C").await;
    let mut user = app.db.user_by_email("before@example.com").await.unwrap().unwrap();
    user.google_id = Some("g-1".into());
    app.db.update_user(&user).await.unwrap();

    let res = send(
        &app,
        session.request(
            Method::POST,
            "/api/v1/users/me/email/instructions",
            Some(json!({ "email": "after@example.com", "emailConfirmation": "after@example.com" })),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let mail = app.mailer.last_to("after@example.com").unwrap();
    assert!(mail.body.contains("/users/email/update/confirm?token="));

    let token = app.mailer.last_token_to("after@example.com");
    let res = send(
        &app,
        session.request(Method::PUT, "/api/v1/users/me/email", Some(json!({ "token": token }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["user"]["email"], "after@example.com");

    assert!(app.db.user_by_email("before@example.com").await.unwrap().is_none());
    let user = app.db.user_by_email("after@example.com").await.unwrap().unwrap();
    assert_eq!(user.google_id, None);
    assert!(app.db.user_by_google_id("g-1").await.unwrap().is_none());
}

#[tokio::test]
async fn email_change_token_is_bound_to_requesting_user() {
    let app = create_test_app().await;
    let alice = register(&app, "alice@example.com", "Alice", "A").await;
    let mallory = register(&app, "mallory@example.com", "Mallory", "M").await;

    send(
        &app,
        alice.request(
            Method::POST,
            "/api/v1/users/me/email/instructions",
            Some(json!({ "email": "alice2@example.com", "emailConfirmation": "alice2@example.com" })),
        ),
    )
    .await;
    let token = app.mailer.last_token_to("alice2@example.com");

    let res = send(
        &app,
        mallory.request(Method::PUT, "/api/v1/users/me/email", Some(json!({ "token": token }))),
    )
    .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["title"], "permission_denied");
    assert!(app.db.user_by_email("mallory@example.com").await.unwrap().is_some());
}

#[tokio::test]
async fn email_change_request_validation() {
    let app = create_test_app().await;
    let session = register(&app, "first@example.com", "F", "1").await;
    register(&app, "taken@example.com", "T", "2").await;

    let mismatch = send(
        &app,
        session.request(
            Method::POST,
            "/api/v1/users/me/email/instructions",
            Some(json!({ "email": "a@example.com", "emailConfirmation": "b@example.com" })),
        ),
    )
    .await;
    assert_eq!(mismatch.status, StatusCode::BAD_REQUEST);

    let taken = send(
        &app,
        session.request(
            Method::POST,
            "/api/v1/users/me/email/instructions",
            Some(json!({ "email": "taken@example.com", "emailConfirmation": "taken@example.com" })),
        ),
    )
    .await;
    assert_eq!(taken.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn plans_are_public_and_sorted_by_price() {
    let app = create_test_app().await;
    let res = send(
        &app,
        Request::builder()
            .uri("/api/v1/plans")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    let plans = res.body["plans"].as_array().unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0]["name"], "Basic");
    assert_eq!(plans[1]["price"], 3000);
}

#[tokio::test]
async fn subscription_shows_trial_and_plan() {
    let app = create_test_app().await;
    let session = register(&app, "sub@example.com", "S", "B").await;

    let res = send(&app, session.request(Method::GET, "/api/v1/subscriptions", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    let sub = &res.body["subscription"];
    assert_eq!(sub["status"], "trial");
    assert!(sub["plan"].is_null());
    let start: i64 = sub["trialStart"].as_str().unwrap().parse().unwrap();
    let end: i64 = sub["trialEnd"].as_str().unwrap().parse().unwrap();
    assert_eq!(end - start, 14 * 24 * 3600);
}

#[tokio::test]
async fn upgrade_requires_linked_billing() {
    let app = create_test_app().await;
    let session = register(&app, "upgrade@example.com", "U", "P").await;
    let body = json!({ "planId": app.pro_plan.id.to_string() });

    let res = send(
        &app,
        session.request(Method::POST, "/api/v1/subscriptions/upgrade", Some(body.clone())),
    )
    .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let user = app.db.user_by_email("upgrade@example.com").await.unwrap().unwrap();
    let mut sub = app.db.subscription_by_user_id(user.id).await.unwrap().unwrap();
    sub.stripe_customer_id = Some("cus_u".into());
    sub.stripe_subscription_id = Some("sub_u".into());
    app.db.update_subscription(&sub).await.unwrap();

    let res = send(
        &app,
        session.request(Method::POST, "/api/v1/subscriptions/upgrade", Some(body)),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);

    let sub = app.db.subscription_by_user_id(user.id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.plan_id, Some(app.pro_plan.id));
    assert!(app.billing.calls().contains(&BillingCall::UpdateItem(
        "si_sub_u".into(),
        SubscriptionItemUpdate {
            price_id: Some("price_pro".into()),
            quantity: Some(1),
        }
    )));

    let res = send(&app, session.request(Method::GET, "/api/v1/subscriptions", None)).await;
    assert_eq!(res.body["subscription"]["plan"]["name"], "Pro");
}

#[tokio::test]
async fn upgrade_to_unknown_plan_is_not_found() {
    let app = create_test_app().await;
    let session = register(&app, "noplan@example.com", "N", "P").await;
    let res = send(
        &app,
        session.request(
            Method::POST,
            "/api/v1/subscriptions/upgrade",
            Some(json!({ "planId": uuid::Uuid::new_v4().to_string() })),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["title"], "plan_not_found");
}

#[tokio::test]
async fn cancel_schedules_deletion_once() {
    let app = create_test_app().await;
    let session = register(&app, "cancel@example.com", "C", "N").await;

    let res = send(&app, session.request(Method::POST, "/api/v1/subscriptions/cancel", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    let first = app
        .db
        .user_by_email("cancel@example.com")
        .await
        .unwrap()
        .unwrap()
        .scheduled_deletion_at;
    assert!(first.is_some());

    let res = send(&app, session.request(Method::POST, "/api/v1/subscriptions/cancel", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    let second = app
        .db
        .user_by_email("cancel@example.com")
        .await
        .unwrap()
        .unwrap()
        .scheduled_deletion_at;
    assert_eq!(first, second);

    let res = send(&app, session.request(Method::GET, "/api/v1/users/me", None)).await;
    assert!(res.body["user"]["scheduledDeletionAt"].is_string());
}

#[tokio::test]
async fn checkout_and_portal_urls() {
    let app = create_test_app().await;
    let session = register(&app, "stripe@example.com", "S", "T").await;

    let res = send(
        &app,
        session.request(
            Method::POST,
            "/api/v1/stripe/createCheckoutSession",
            Some(json!({ "planId": app.basic_plan.id.to_string() })),
        ),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["url"], "https://checkout.stripe.test/session");
    let user = app.db.user_by_email("stripe@example.com").await.unwrap().unwrap();
    match app.billing.calls().last() {
        Some(BillingCall::Checkout(request)) => {
            assert_eq!(request.price_id, "price_basic");
            assert_eq!(request.user_id, user.id);
            assert_eq!(request.quantity, 1);
        }
        other => panic!("unexpected call {:?}", other),
    }

    let res = send(&app, session.request(Method::GET, "/api/v1/stripe/customerPortalUrl", None)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    let mut sub = app.db.subscription_by_user_id(user.id).await.unwrap().unwrap();
    sub.stripe_customer_id = Some("cus_p".into());
    app.db.update_subscription(&sub).await.unwrap();
    let res = send(&app, session.request(Method::GET, "/api/v1/stripe/customerPortalUrl", None)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        app.billing.calls().last(),
        Some(&BillingCall::Portal("cus_p".into()))
    );
}

#[tokio::test]
async fn health_and_security_headers() {
    let app = create_test_app().await;
    let res = send(
        &app,
        Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "status": "ok" }));
    assert_eq!(res.headers.get("X-Frame-Options").unwrap(), "DENY");
    assert_eq!(res.headers.get("Cache-Control").unwrap(), "no-store");
}
