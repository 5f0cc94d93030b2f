//! Plan change, add-on subscription and retry request tests

#[path = "../common/mod.rs"]
mod common;

use axum::{http::StatusCode, response::IntoResponse};
use common::*;
use tenantpay::billing::{
    ApplyOutcome, apply_callback, request_plan_change, retry_payment, subscribe_addon,
};

fn status_of(err: AppError) -> StatusCode {
    err.into_response().status()
}

#[tokio::test]
async fn test_free_plan_completes_without_payment() {
    let ctx = create_test_context();
    let (user, free) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "free@example.com"),
            create_test_plan(&conn, "Free", 0),
        )
    };

    let result = request_plan_change(&ctx.state, &user.id, &free.id, None)
        .await
        .expect("free plan change should succeed");

    assert!(result.payment.is_none());
    assert!(result.initiation.is_none());
    assert_eq!(result.plan_change.status, PlanChangeStatus::Completed);
    assert_eq!(result.plan_change.reason.as_deref(), Some(NO_PAYMENT_REQUIRED));
    let subscription = result.subscription.expect("subscription created");
    assert!(subscription.payment_id.is_none());
    assert_eq!(ctx.fawry.calls(), 0, "no provider call for a free plan");

    let conn = ctx.conn();
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user.current_plan_id.as_deref(), Some(free.id.as_str()));
}

#[tokio::test]
async fn test_paid_plan_creates_pending_payment_with_reference() {
    let ctx = create_test_context();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "pro@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    let result = request_plan_change(&ctx.state, &user.id, &pro.id, None)
        .await
        .unwrap();

    let payment = result.payment.expect("payment created");
    let initiation = result.initiation.expect("provider initiated");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.provider, PaymentProvider::Fawry, "fawry is the default provider");
    assert_eq!(payment.amount_cents, 10_000);
    assert_eq!(payment.target, PaymentTarget::PlanChange(result.plan_change.id.clone()));
    assert_eq!(payment.reference_number.as_deref(), Some(initiation.reference_number.as_str()));
    assert_eq!(result.plan_change.status, PlanChangeStatus::Pending);
    assert_eq!(result.plan_change.payment_id.as_deref(), Some(payment.id.as_str()));

    let conn = ctx.conn();
    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.reference_number, payment.reference_number);
    let expected_expiry = stored.created_at + 24 * 3600;
    assert!((stored.expires_at - expected_expiry).abs() <= 1);
}

#[tokio::test]
async fn test_explicit_provider_is_used() {
    let ctx = create_test_context();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "pro@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    let result = request_plan_change(&ctx.state, &user.id, &pro.id, Some(PaymentProvider::Paymob))
        .await
        .unwrap();
    assert_eq!(result.payment.unwrap().provider, PaymentProvider::Paymob);
    assert!(result.initiation.unwrap().redirect_url.is_some());
    assert_eq!(ctx.paymob.calls(), 1);
    assert_eq!(ctx.fawry.calls(), 0);
}

#[tokio::test]
async fn test_plan_change_validation() {
    let ctx = create_test_context();
    let (user, pro, retired) = {
        let conn = ctx.conn();
        let user = create_test_user(&conn, "pro@example.com");
        let pro = create_test_plan(&conn, "Pro", 10_000);
        let retired = create_test_plan(&conn, "Legacy", 5_000);
        queries::set_plan_active(&conn, &retired.id, false).unwrap();
        queries::set_user_current_plan(&conn, &user.id, &pro.id).unwrap();
        (user, pro, retired)
    };

    let err = request_plan_change(&ctx.state, &user.id, &pro.id, None).await.unwrap_err();
    assert_eq!(status_of(err), StatusCode::CONFLICT);

    let err = request_plan_change(&ctx.state, &user.id, &retired.id, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let err = request_plan_change(&ctx.state, &user.id, "tp_pln_missing", None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);

    let err = request_plan_change(&ctx.state, "tp_usr_missing", &pro.id, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unavailable_provider_keeps_payment_retryable() {
    let ctx = create_test_context();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "retry@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    ctx.fawry.set_behavior(StubBehavior::Unavailable);
    let err = request_plan_change(&ctx.state, &user.id, &pro.id, None)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);

    let payment_id = message
        .split("payment ")
        .nth(1)
        .and_then(|rest| rest.strip_suffix(')'))
        .expect("error names the payment")
        .to_string();

    {
        let conn = ctx.conn();
        let payment = queries::get_payment_by_id(&conn, &payment_id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.reference_number.is_none());
    }

    ctx.fawry.set_behavior(StubBehavior::Succeed);
    let retried = retry_payment(&ctx.state, &user.id, &payment_id).await.unwrap();
    assert_eq!(retried.payment.id, payment_id);
    assert_eq!(
        retried.payment.reference_number.as_deref(),
        Some(retried.initiation.reference_number.as_str())
    );
    assert_eq!(ctx.fawry.calls(), 2);
}

#[tokio::test]
async fn test_payment_on_reference_replaced_by_retry_still_applies() {
    let ctx = create_test_context();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "twice@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    let first = request_plan_change(&ctx.state, &user.id, &pro.id, None)
        .await
        .unwrap();
    let payment = first.payment.expect("payment created");
    let first_reference = first.initiation.expect("initiated").reference_number;

    let retried = retry_payment(&ctx.state, &user.id, &payment.id).await.unwrap();
    assert_ne!(retried.initiation.reference_number, first_reference);

    // The customer paid against the first reference
    let mut conn = ctx.conn();
    let callback = parse_fawry(&fawry_notification(&first_reference, 10_000, "PAID"));
    let outcome = apply_callback(&mut conn, &callback).expect("old reference resolves");
    assert!(matches!(outcome, ApplyOutcome::Applied { conversion: Some(_), .. }));

    let stored = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
    let user = queries::get_user_by_id(&conn, &user.id).unwrap().unwrap();
    assert_eq!(user.current_plan_id.as_deref(), Some(pro.id.as_str()));
}

#[tokio::test]
async fn test_rejected_initiation_is_unprocessable() {
    let ctx = create_test_context();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "reject@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    ctx.fawry.set_behavior(StubBehavior::Rejected);
    let err = request_plan_change(&ctx.state, &user.id, &pro.id, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_retry_refused_for_settled_or_foreign_payment() {
    let ctx = create_test_context();
    let (user, other, payment) = {
        let conn = ctx.conn();
        let user = create_test_user(&conn, "owner@example.com");
        let other = create_test_user(&conn, "other@example.com");
        let plan = create_test_plan(&conn, "Pro", 10_000);
        let (_, payment) =
            create_pending_plan_change(&conn, &user, &plan, PaymentProvider::Fawry, "RT-1");
        (user, other, payment)
    };

    let err = retry_payment(&ctx.state, &other.id, &payment.id).await.unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);

    {
        let conn = ctx.conn();
        queries::transition_payment_status(&conn, &payment.id, PaymentStatus::Failed, None)
            .unwrap();
    }
    let err = retry_payment(&ctx.state, &user.id, &payment.id).await.unwrap_err();
    assert_eq!(status_of(err), StatusCode::CONFLICT);
    assert_eq!(ctx.fawry.calls(), 0);
}

#[tokio::test]
async fn test_retry_refused_after_expiry() {
    let ctx = create_test_context();
    let (user, payment) = {
        let conn = ctx.conn();
        let user = create_test_user(&conn, "late@example.com");
        let plan = create_test_plan(&conn, "Pro", 10_000);
        let (_, payment) = create_pending_plan_change_expiring(
            &conn,
            &user,
            &plan,
            PaymentProvider::Fawry,
            "RT-2",
            now() - 1,
        );
        (user, payment)
    };

    let err = retry_payment(&ctx.state, &user.id, &payment.id).await.unwrap_err();
    assert_eq!(status_of(err), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_subscribe_time_addon_computes_end() {
    let ctx = create_test_context();
    let (user, addon) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "addon@example.com"),
            create_time_addon(&conn, 2_500, 30),
        )
    };

    let result = subscribe_addon(&ctx.state, &user.id, &addon.id, 3, None, None)
        .await
        .unwrap();

    let sub = result.addon_subscription;
    assert_eq!(sub.status, AddonSubscriptionStatus::Pending);
    assert_eq!(sub.total_price_cents, 7_500);
    assert_eq!(sub.end_at, Some(sub.start_at + 90 * 86_400));
    assert!(sub.usage_limit.is_none());

    let payment = result.payment.expect("payment created");
    assert_eq!(payment.amount_cents, 7_500);
    assert_eq!(payment.target, PaymentTarget::AddonSubscription(sub.id.clone()));
}

#[tokio::test]
async fn test_subscribe_usage_addon_with_tier() {
    let ctx = create_test_context();
    let (user, addon, tier) = {
        let conn = ctx.conn();
        let user = create_test_user(&conn, "addon@example.com");
        let addon = create_usage_addon(&conn, 50);
        let tier = queries::create_pricing_tier(&conn, &addon.id, "Bulk", 35).unwrap();
        (user, addon, tier)
    };

    let result = subscribe_addon(&ctx.state, &user.id, &addon.id, 1_000, Some(&tier.id), None)
        .await
        .unwrap();

    let sub = result.addon_subscription;
    assert_eq!(sub.tier_id.as_deref(), Some(tier.id.as_str()));
    assert_eq!(sub.total_price_cents, 35_000);
    assert_eq!(sub.usage_limit, Some(1_000));
    assert!(sub.end_at.is_none());
    assert_eq!(result.payment.unwrap().amount_cents, 35_000);
}

#[tokio::test]
async fn test_free_addon_activates_immediately() {
    let ctx = create_test_context();
    let (user, addon) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "addon@example.com"),
            create_usage_addon(&conn, 0),
        )
    };

    let result = subscribe_addon(&ctx.state, &user.id, &addon.id, 20, None, None)
        .await
        .unwrap();
    assert!(result.payment.is_none());
    assert_eq!(result.addon_subscription.status, AddonSubscriptionStatus::Active);
    assert_eq!(result.addon_subscription.usage_limit, Some(20));
    assert_eq!(ctx.fawry.calls(), 0);
}

#[tokio::test]
async fn test_subscribe_validation() {
    let ctx = create_test_context();
    let (user, addon, other_tier) = {
        let conn = ctx.conn();
        let user = create_test_user(&conn, "addon@example.com");
        let addon = create_usage_addon(&conn, 50);
        let other = create_time_addon(&conn, 2_500, 30);
        let other_tier = queries::create_pricing_tier(&conn, &other.id, "Annual", 2_000).unwrap();
        (user, addon, other_tier)
    };

    let err = subscribe_addon(&ctx.state, &user.id, &addon.id, 0, None, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

    let err = subscribe_addon(&ctx.state, &user.id, &addon.id, 5, Some(&other_tier.id), None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND, "tier must belong to the add-on");

    let err = subscribe_addon(&ctx.state, &user.id, "tp_add_missing", 5, None, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_time_addon_quantity_refused() {
    let ctx = create_test_context();
    let (user, storage, free_storage) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "huge@example.com"),
            create_time_addon(&conn, 1, 30),
            create_time_addon(&conn, 0, 30),
        )
    };

    for addon in [&storage, &free_storage] {
        let err = subscribe_addon(&ctx.state, &user.id, &addon.id, 100_000_000_000_000, None, None)
            .await
            .unwrap_err();
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    let conn = ctx.conn();
    let created: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM addon_subscriptions WHERE user_id = ?1",
            [&user.id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(created, 0);
    assert_eq!(ctx.fawry.calls(), 0);
}

#[tokio::test]
async fn test_no_configured_provider() {
    let mut ctx = create_test_context();
    ctx.state.gateways = PaymentGateways::default();
    let (user, pro) = {
        let conn = ctx.conn();
        (
            create_test_user(&conn, "nogw@example.com"),
            create_test_plan(&conn, "Pro", 10_000),
        )
    };

    let err = request_plan_change(&ctx.state, &user.id, &pro.id, None)
        .await
        .unwrap_err();
    assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
}
