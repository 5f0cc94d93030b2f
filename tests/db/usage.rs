//! Usage counter tests for usage-mode add-on subscriptions

#[path = "../common/mod.rs"]
mod common;

use common::*;
use tenantpay::billing::{LedgerError, record_usage};

#[test]
fn test_increment_within_limit() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &addon, 10);

    assert!(queries::increment_addon_usage(&conn, &sub.id, 4).unwrap());
    assert!(queries::increment_addon_usage(&conn, &sub.id, 6).unwrap());
    assert!(
        !queries::increment_addon_usage(&conn, &sub.id, 1).unwrap(),
        "increment past the limit must be refused"
    );

    let stored = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.current_usage, 10);
    assert_eq!(stored.remaining_usage(), Some(0));
}

#[test]
fn test_increment_refused_for_time_mode() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_time_addon(&conn, 2_500, 30);
    let (sub, _) =
        create_pending_addon_subscription(&conn, &user, &addon, 1, PaymentProvider::Fawry, "T-1");
    queries::activate_addon_subscription(&conn, &sub.id).unwrap();

    assert!(!queries::increment_addon_usage(&conn, &sub.id, 1).unwrap());
}

#[test]
fn test_increment_refused_when_not_active() {
    let conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let (sub, _) =
        create_pending_addon_subscription(&conn, &user, &addon, 5, PaymentProvider::Fawry, "U-1");

    assert_eq!(sub.status, AddonSubscriptionStatus::Pending);
    assert!(!queries::increment_addon_usage(&conn, &sub.id, 1).unwrap());
}

#[test]
fn test_usage_logs_are_listed_in_order() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "meter@example.com");
    let addon = create_usage_addon(&conn, 50);
    let sub = create_active_usage_subscription(&conn, &user, &addon, 100);

    let meta = serde_json::json!({"campaign": "spring"});
    record_usage(&mut conn, &user.id, &sub.id, 3, "batch 1", Some(&meta)).unwrap();
    record_usage(&mut conn, &user.id, &sub.id, 7, "batch 2", None).unwrap();

    let logs = queries::list_usage_logs(&conn, &sub.id).unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].amount, 3);
    assert_eq!(logs[0].description, "batch 1");
    assert_eq!(logs[1].amount, 7);
    let total: i64 = logs.iter().map(|l| l.amount).sum();
    let stored = queries::get_addon_subscription_by_id(&conn, &sub.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.current_usage, total);
}

/// Concurrent reporters must never push usage past the limit, and the
/// counter must always equal the sum of accepted log entries.
#[test]
fn test_concurrent_usage_never_exceeds_limit() {
    use std::sync::{Arc, Barrier};
    use std::thread;

    let (_dir, path) = setup_file_db();
    let (user_id, sub_id) = {
        let conn = open_with_timeout(&path);
        let user = create_test_user(&conn, "meter@example.com");
        let addon = create_usage_addon(&conn, 50);
        let sub = create_active_usage_subscription(&conn, &user, &addon, 25);
        (user.id, sub.id)
    };

    let num_threads = 10;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            let user_id = user_id.clone();
            let sub_id = sub_id.clone();
            thread::spawn(move || {
                let mut conn = open_with_timeout(&path);
                barrier.wait();
                let mut accepted = 0;
                for _ in 0..3 {
                    match record_usage(&mut conn, &user_id, &sub_id, 1, &format!("t{}", i), None) {
                        Ok(_) => accepted += 1,
                        Err(LedgerError::LimitExceeded { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                accepted
            })
        })
        .collect();

    let accepted: i64 = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .sum();

    let conn = open_with_timeout(&path);
    let stored = queries::get_addon_subscription_by_id(&conn, &sub_id)
        .unwrap()
        .unwrap();
    let logged: i64 = queries::list_usage_logs(&conn, &sub_id)
        .unwrap()
        .iter()
        .map(|l| l.amount)
        .sum();

    assert_eq!(accepted, 25, "30 single-unit reports against a limit of 25");
    assert_eq!(stored.current_usage, 25);
    assert_eq!(logged, stored.current_usage);
}
