//! Paymob callback endpoint tests

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use common::*;

fn paymob_uri(hmac: &str) -> String {
    format!("/webhooks/paymob?hmac={}", hmac)
}

fn setup(ctx: &TestContext, order_id: i64, quantity: i64) -> (AddonSubscription, PaymentRecord) {
    let conn = ctx.conn();
    let user = create_test_user(&conn, "paymob@example.com");
    let addon = create_usage_addon(&conn, 50);
    create_pending_addon_subscription(
        &conn,
        &user,
        &addon,
        quantity,
        PaymentProvider::Paymob,
        &order_id.to_string(),
    )
}

#[tokio::test]
async fn test_success_activates_addon() {
    let ctx = create_test_context();
    let (sub, payment) = setup(&ctx, 9001, 200);

    let (body, sig) = paymob_callback(9001, &payment.id, 10_000, true, false);
    let (status, json) = post_raw(ctx.app(), &paymob_uri(&sig), None, body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");

    let (status, json) = post_raw(ctx.app(), &paymob_uri(&sig), None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "already_processed");

    let conn = ctx.conn();
    let sub = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, AddonSubscriptionStatus::Active);
    assert_eq!(sub.usage_limit, Some(200));
}

#[tokio::test]
async fn test_void_flag_outside_digest_does_not_settle() {
    let ctx = create_test_context();
    let (sub, payment) = setup(&ctx, 9010, 10);

    let (body, sig) = paymob_callback(9010, &payment.id, 500, true, false);
    let mut value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    value["obj"]["is_voided"] = serde_json::json!(true);
    let body = serde_json::to_vec(&value).unwrap();

    let (status, json) = post_raw(ctx.app(), &paymob_uri(&sig), None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending");

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    let sub = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, AddonSubscriptionStatus::Pending);
}

#[tokio::test]
async fn test_uppercase_hmac_accepted() {
    let ctx = create_test_context();
    let (_, payment) = setup(&ctx, 9002, 10);

    let (body, sig) = paymob_callback(9002, &payment.id, 500, true, false);
    let (status, _) = post_raw(ctx.app(), &paymob_uri(&sig.to_uppercase()), None, body).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_tampered_amount_returns_401() {
    let ctx = create_test_context();
    let (sub, payment) = setup(&ctx, 9003, 10);

    let (_, sig) = paymob_callback(9003, &payment.id, 500, true, false);
    // Body altered after signing
    let (tampered, _) = paymob_callback(9003, &payment.id, 1, true, false);
    let (status, json) = post_raw(ctx.app(), &paymob_uri(&sig), None, tampered).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], "rejected");

    let conn = ctx.conn();
    let sub = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, AddonSubscriptionStatus::Pending);
}

#[tokio::test]
async fn test_missing_hmac_returns_401() {
    let ctx = create_test_context();
    let (_, payment) = setup(&ctx, 9004, 10);

    let (body, _) = paymob_callback(9004, &payment.id, 500, true, false);
    let (status, _) = post_raw(ctx.app(), "/webhooks/paymob", None, body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_declined_payment_marks_failed() {
    let ctx = create_test_context();
    let (sub, payment) = setup(&ctx, 9005, 10);

    let (body, sig) = paymob_callback(9005, &payment.id, 500, false, false);
    let (status, json) = post_raw(ctx.app(), &paymob_uri(&sig), None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");

    let conn = ctx.conn();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let sub = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, AddonSubscriptionStatus::Pending, "aged out by the sweep, not here");
}
