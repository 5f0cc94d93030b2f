//! Fawry callback endpoint tests

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use common::*;

const FAWRY_URI: &str = "/webhooks/fawry";

fn setup(ctx: &TestContext, reference: &str) -> (User, Plan, PaymentRecord) {
    let conn = ctx.conn();
    let user = create_test_user(&conn, "hook@example.com");
    let plan = create_test_plan(&conn, "Pro", 10_000);
    let (_, payment) =
        create_pending_plan_change(&conn, &user, &plan, PaymentProvider::Fawry, reference);
    (user, plan, payment)
}

#[tokio::test]
async fn test_valid_callback_processed_then_deduplicated() {
    let ctx = create_test_context();
    let (user, plan, payment) = setup(&ctx, "HOOK-1");
    let body = fawry_notification("HOOK-1", 10_000, "PAID");

    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");

    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::OK, "redelivery must be acknowledged");
    assert_eq!(json["status"], "already_processed");

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user.current_plan_id.as_deref(), Some(plan.id.as_str()));
    assert_eq!(queries::list_subscriptions_for_user(&conn, &user.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_forged_callback_returns_401() {
    let ctx = create_test_context();
    let (_, _, payment) = setup(&ctx, "HOOK-2");
    let body = fawry_notification_signed_with("HOOK-2", 10_000, "PAID", "attacker-key");

    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], "rejected");

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_unknown_reference_returns_404() {
    let ctx = create_test_context();
    setup(&ctx, "HOOK-3");

    let body = fawry_notification("NOT-OURS", 10_000, "PAID");
    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "not_found");
}

#[tokio::test]
async fn test_malformed_body_returns_401() {
    let ctx = create_test_context();
    let (status, _) = post_raw(ctx.app(), FAWRY_URI, None, b"not json".to_vec()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_pending_status_acknowledged_without_change() {
    let ctx = create_test_context();
    let (_, _, payment) = setup(&ctx, "HOOK-4");

    let body = fawry_notification("HOOK-4", 10_000, "UNPAID");
    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "pending");

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_success_after_expiry_is_flagged() {
    let ctx = create_test_context();
    let (user, _, payment) = setup(&ctx, "HOOK-6");
    {
        let conn = ctx.conn();
        queries::transition_payment_status(&conn, &payment.id, PaymentStatus::Expired, None)
            .unwrap();
    }

    let body = fawry_notification("HOOK-6", 10_000, "PAID");
    let (status, json) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "late_success");

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Expired);
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert!(user.current_plan_id.is_none());
}

#[tokio::test]
async fn test_unconfigured_provider_returns_404() {
    let mut ctx = create_test_context();
    ctx.state.gateways.fawry = None;

    let body = fawry_notification("HOOK-5", 10_000, "PAID");
    let (status, _) = post_raw(ctx.app(), FAWRY_URI, None, body).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_deliveries_apply_once() {
    let ctx = create_test_context();
    let (user, _, _) = setup(&ctx, "HOOK-6");
    let body = fawry_notification("HOOK-6", 10_000, "PAID");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let app = ctx.app();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            post_raw(app, FAWRY_URI, None, body).await
        }));
    }

    let mut processed = 0;
    for handle in handles {
        let (status, json) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        if json["status"] == "processed" {
            processed += 1;
        } else {
            assert_eq!(json["status"], "already_processed");
        }
    }
    assert_eq!(processed, 1, "exactly one delivery may apply");

    let conn = ctx.conn();
    assert_eq!(queries::list_subscriptions_for_user(&conn, &user.id).unwrap().len(), 1);
}
