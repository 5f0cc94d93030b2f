//! Usage metering and add-on expiry tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use tenantpay::billing::{LedgerError, record_usage, sweep_expired};

#[test]
fn test_usage_up_to_limit_then_refused() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &addon, 100);

    let receipt = record_usage(&mut conn, &user.id, &sub.id, 60, "first", None).unwrap();
    assert_eq!(receipt.current_usage, 60);
    assert_eq!(receipt.remaining, 40);
    assert!(!receipt.limit_reached());

    let receipt = record_usage(&mut conn, &user.id, &sub.id, 40, "second", None).unwrap();
    assert_eq!(receipt.current_usage, 100);
    assert!(receipt.limit_reached());

    let err = record_usage(&mut conn, &user.id, &sub.id, 1, "over", None).unwrap_err();
    match err {
        LedgerError::LimitExceeded {
            current,
            requested,
            limit,
        } => {
            assert_eq!((current, requested, limit), (100, 1, 100));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(queries::list_usage_logs(&conn, &sub.id).unwrap().len(), 2);
}

#[test]
fn test_oversized_report_refused_whole() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &addon, 100);

    record_usage(&mut conn, &user.id, &sub.id, 90, "bulk", None).unwrap();
    let err = record_usage(&mut conn, &user.id, &sub.id, 11, "too much", None).unwrap_err();
    assert!(matches!(err, LedgerError::LimitExceeded { .. }));

    let stored = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.current_usage, 90, "refused report must not be partially applied");
    assert_eq!(queries::list_usage_logs(&conn, &sub.id).unwrap().len(), 1);
}

#[test]
fn test_non_positive_amount_refused() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &addon, 100);

    for amount in [0, -5] {
        let err = record_usage(&mut conn, &user.id, &sub.id, amount, "bad", None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount));
    }
}

#[test]
fn test_usage_on_someone_elses_subscription_is_not_found() {
    let mut conn = setup_test_db();
    let owner = create_test_user(&conn, "owner@example.com");
    let other = create_test_user(&conn, "other@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &owner, &addon, 100);

    let err = record_usage(&mut conn, &other.id, &sub.id, 1, "sneaky", None).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound));
}

#[test]
fn test_usage_on_pending_subscription_refused() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let (sub, _) =
        create_pending_addon_subscription(&conn, &user, &addon, 10, PaymentProvider::Fawry, "U-2");

    let err = record_usage(&mut conn, &user.id, &sub.id, 1, "early", None).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::NotActive(AddonSubscriptionStatus::Pending)
    ));
}

#[test]
fn test_usage_on_time_mode_subscription_refused() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_time_addon(&conn, 2_500, 30);
    let (sub, _) =
        create_pending_addon_subscription(&conn, &user, &addon, 1, PaymentProvider::Fawry, "T-2");
    queries::activate_addon_subscription(&conn, &sub.id).unwrap();

    let err = record_usage(&mut conn, &user.id, &sub.id, 1, "storage", None).unwrap_err();
    assert!(matches!(err, LedgerError::NotUsageMetered));
}

#[test]
fn test_ledger_errors_map_to_http_errors() {
    let cases = [
        (LedgerError::InvalidAmount, 400),
        (LedgerError::NotFound, 404),
        (
            LedgerError::NotActive(AddonSubscriptionStatus::Expired),
            409,
        ),
        (LedgerError::NotUsageMetered, 400),
        (
            LedgerError::LimitExceeded {
                current: 1,
                requested: 1,
                limit: 1,
            },
            409,
        ),
    ];
    for (err, status) in cases {
        let app_err = AppError::from(err);
        let response = axum::response::IntoResponse::into_response(app_err);
        assert_eq!(response.status().as_u16(), status);
    }
}

#[test]
fn test_sweep_expires_only_ended_time_subscriptions() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let storage = create_time_addon(&conn, 2_500, 30);
    let sms = create_usage_addon(&conn, 50);

    let (time_sub, _) =
        create_pending_addon_subscription(&conn, &user, &storage, 1, PaymentProvider::Fawry, "T-3");
    queries::activate_addon_subscription(&conn, &time_sub.id).unwrap();
    let usage_sub = create_active_usage_subscription(&conn, &user, &sms, 10);

    let end = time_sub.end_at.expect("time-mode subscription has an end");

    // Not yet past the end
    assert_eq!(sweep_expired(&conn, end).unwrap(), 0);

    assert_eq!(sweep_expired(&conn, end + 1).unwrap(), 1);
    assert_eq!(sweep_expired(&conn, end + 1).unwrap(), 0, "sweep is idempotent");

    let status = |id: &str| {
        queries::get_addon_subscription_by_id(&conn, id)
            .unwrap()
            .unwrap()
            .status
    };
    assert_eq!(status(&time_sub.id), AddonSubscriptionStatus::Expired);
    assert_eq!(status(&usage_sub.id), AddonSubscriptionStatus::Active);
}

#[test]
fn test_exhausted_usage_subscription_stays_active() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let sms = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &sms, 5);

    record_usage(&mut conn, &user.id, &sub.id, 5, "all of it", None).unwrap();
    sweep_expired(&conn, now() + 365 * 86_400).unwrap();

    let stored = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AddonSubscriptionStatus::Active);
    assert_eq!(stored.remaining_usage(), Some(0));
}
