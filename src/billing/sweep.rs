//! Periodic maintenance: payment expiry, target age-out, add-on expiry and
//! reconciliation of PAID payments whose conversion never committed.

use rusqlite::Connection;
use serde::Serialize;

use super::coordinator::{self, Conversion, Settlement};
use super::ledger;
use crate::db::queries;
use crate::error::Result;
use crate::notify::Notifier;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_payments: usize,
    pub rejected_plan_changes: usize,
    pub cancelled_addon_subscriptions: usize,
    pub expired_addon_subscriptions: usize,
    pub reconciled: usize,
    pub reconcile_failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Expire overdue PENDING payments, then reject/cancel the targets of every
/// payment that ended without being paid.
pub fn expire_payments(conn: &Connection, now: i64, report: &mut SweepReport) -> Result<()> {
    report.expired_payments = queries::expire_stale_payments(conn, now)?;
    report.rejected_plan_changes = queries::reject_plan_changes_with_dead_payments(conn)?;
    report.cancelled_addon_subscriptions =
        queries::cancel_addon_subscriptions_with_dead_payments(conn)?;
    Ok(())
}

/// Re-run conversion for PAID payments older than `grace_secs` whose target is
/// still unconverted. Each payment converts in its own transaction; one
/// failure does not stop the rest.
pub fn reconcile_paid(
    conn: &mut Connection,
    now: i64,
    grace_secs: i64,
    notifier: &Notifier,
    report: &mut SweepReport,
) -> Result<()> {
    let stuck = queries::list_unconverted_paid_payments(conn, now - grace_secs)?;

    for payment in &stuck {
        match coordinator::convert(conn, Settlement::Paid(payment)) {
            Ok(conversion) => {
                if !matches!(conversion, Conversion::AlreadyConverted) {
                    report.reconciled += 1;
                    tracing::info!("Reconciled payment {}", payment.id);
                }
                coordinator::publish_conversion(notifier, &conversion);
            }
            Err(e) => {
                report.reconcile_failures += 1;
                tracing::error!(
                    alert = true,
                    payment_id = %payment.id,
                    "Reconciliation failed for PAID payment: {}",
                    e
                );
            }
        }
    }
    Ok(())
}

/// Run every sweep once.
pub fn run_sweeps(
    conn: &mut Connection,
    now: i64,
    reconcile_grace_secs: i64,
    notifier: &Notifier,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    // Reconcile first so a paid-but-unconverted target is never aged out
    reconcile_paid(conn, now, reconcile_grace_secs, notifier, &mut report)?;
    expire_payments(conn, now, &mut report)?;
    report.expired_addon_subscriptions = ledger::sweep_expired(conn, now)?;

    if !report.is_empty() {
        tracing::info!(?report, "Sweep finished");
    }
    Ok(report)
}
