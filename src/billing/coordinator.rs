//! Applies verified provider outcomes to payments and converts successful
//! payments into plan changes or add-on activations.
//!
//! Each callback passes three gates:
//!
//! 1. **Verified**: signature, provider and amount must match the stored
//!    payment, otherwise the callback is rejected with nothing written.
//! 2. **Applied**: the payment leaves PENDING through a conditional update, so
//!    exactly one delivery wins; every other delivery is a duplicate.
//! 3. **Converted**: a PAID payment's target is converted in one IMMEDIATE
//!    transaction. Conversion is conditional on the target still being
//!    unconverted, so the callback path and the reconciliation sweep can race
//!    without double-applying.

use chrono::Utc;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::db::queries;
use crate::error::{AppError, OptionExt, msg};
use crate::models::{PaymentRecord, PaymentStatus, PaymentTarget, Subscription};
use crate::notify::{EventKind, NotificationEvent, Notifier};
use crate::payments::{CallbackOutcome, ParsedCallback};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("no payment matches the callback reference")]
    UnknownReference,

    /// Signature, provider or amount mismatch. Never mutates state.
    #[error("callback rejected: {0}")]
    Rejected(&'static str),

    /// The payment is PAID but its target could not be converted.
    #[error("conversion failed for payment {}: {}", .payment.id, .source)]
    ConversionFailed {
        payment: Box<PaymentRecord>,
        source: AppError,
    },

    #[error(transparent)]
    Internal(#[from] AppError),
}

impl From<rusqlite::Error> for CoordinatorError {
    fn from(e: rusqlite::Error) -> Self {
        CoordinatorError::Internal(e.into())
    }
}

/// Why a business change is being applied.
#[derive(Debug, Clone, Copy)]
pub enum Settlement<'a> {
    /// A payment reached PAID.
    Paid(&'a PaymentRecord),
    /// The target costs nothing; it carries no payment.
    NoPaymentRequired(&'a PaymentTarget),
}

impl Settlement<'_> {
    pub fn target(&self) -> &PaymentTarget {
        match self {
            Settlement::Paid(payment) => &payment.target,
            Settlement::NoPaymentRequired(target) => target,
        }
    }
}

/// Business change produced by a conversion.
#[derive(Debug, Clone)]
pub enum Conversion {
    PlanChanged {
        user_id: String,
        plan_change_id: String,
        subscription: Subscription,
        superseded: usize,
    },
    AddonActivated {
        user_id: String,
        addon_subscription_id: String,
    },
    /// The target had already been converted (or aged out); nothing was written.
    AlreadyConverted,
}

#[derive(Debug)]
pub enum ApplyOutcome {
    /// This delivery moved the payment out of PENDING.
    Applied {
        payment: PaymentRecord,
        conversion: Option<Conversion>,
    },
    /// Another delivery already finalized the payment.
    Duplicate { payment_id: String },
    /// A verified success arrived for a payment already closed as unpaid.
    /// The customer was charged but nothing converts; needs manual review.
    LateSuccess {
        payment_id: String,
        status: PaymentStatus,
    },
    /// The provider reports no final outcome yet.
    StillPending { payment_id: String },
}

fn target_status(outcome: CallbackOutcome) -> Option<PaymentStatus> {
    match outcome {
        CallbackOutcome::Success => Some(PaymentStatus::Paid),
        CallbackOutcome::Failure => Some(PaymentStatus::Failed),
        CallbackOutcome::Cancelled => Some(PaymentStatus::Cancelled),
        CallbackOutcome::Expired => Some(PaymentStatus::Expired),
        CallbackOutcome::Pending => None,
    }
}

fn resolve_payment(
    conn: &Connection,
    callback: &ParsedCallback,
) -> Result<Option<PaymentRecord>, AppError> {
    if let Some(reference) = callback.reference_number.as_deref() {
        if let Some(payment) = queries::get_payment_by_reference(conn, callback.provider, reference)? {
            return Ok(Some(payment));
        }
    }
    if let Some(txn) = callback.transaction_id.as_deref() {
        return queries::get_payment_by_transaction_id(conn, callback.provider, txn);
    }
    Ok(None)
}

/// Apply one parsed callback.
pub fn apply_callback(
    conn: &mut Connection,
    callback: &ParsedCallback,
) -> Result<ApplyOutcome, CoordinatorError> {
    if !callback.verified {
        return Err(CoordinatorError::Rejected("signature verification failed"));
    }

    let payment = resolve_payment(conn, callback)?.ok_or(CoordinatorError::UnknownReference)?;

    if payment.provider != callback.provider {
        return Err(CoordinatorError::Rejected("provider mismatch"));
    }
    if let Some(amount) = callback.amount_cents {
        if amount != payment.amount_cents {
            return Err(CoordinatorError::Rejected("amount mismatch"));
        }
    }

    let Some(new_status) = target_status(callback.outcome) else {
        tracing::debug!("Payment {} still pending at {}", payment.id, payment.provider);
        return Ok(ApplyOutcome::StillPending {
            payment_id: payment.id,
        });
    };

    if !queries::transition_payment_status(
        conn,
        &payment.id,
        new_status,
        callback.transaction_id.as_deref(),
    )? {
        if new_status == PaymentStatus::Paid {
            let current = queries::get_payment_by_id(conn, &payment.id)?
                .or_not_found(msg::PAYMENT_NOT_FOUND)?;
            if current.status != PaymentStatus::Paid {
                tracing::error!(
                    alert = true,
                    payment_id = %current.id,
                    user_id = %current.user_id,
                    status = %current.status,
                    amount_cents = current.amount_cents,
                    provider = %current.provider,
                    "Provider reports success for a payment already closed as {}",
                    current.status
                );
                return Ok(ApplyOutcome::LateSuccess {
                    payment_id: current.id,
                    status: current.status,
                });
            }
        }
        tracing::info!("Payment {} already processed, ignoring callback", payment.id);
        return Ok(ApplyOutcome::Duplicate {
            payment_id: payment.id,
        });
    }

    let payment = queries::get_payment_by_id(conn, &payment.id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
    tracing::info!(
        "Payment {} moved to {} via {} callback",
        payment.id,
        payment.status,
        payment.provider
    );

    if payment.status != PaymentStatus::Paid {
        // Target stays pending; the sweep ages it out
        return Ok(ApplyOutcome::Applied {
            payment,
            conversion: None,
        });
    }

    match convert(conn, Settlement::Paid(&payment)) {
        Ok(conversion) => Ok(ApplyOutcome::Applied {
            payment,
            conversion: Some(conversion),
        }),
        Err(source) => Err(CoordinatorError::ConversionFailed {
            payment: Box::new(payment),
            source,
        }),
    }
}

/// Convert a settled target in its own IMMEDIATE transaction.
pub fn convert(conn: &mut Connection, settlement: Settlement<'_>) -> Result<Conversion, AppError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let conversion = convert_in(&tx, settlement)?;
    tx.commit()?;
    Ok(conversion)
}

/// Convert a settled target inside a caller-owned transaction.
///
/// All writes happen in `tx`; any error leaves the caller to roll back.
pub fn convert_in(tx: &Transaction<'_>, settlement: Settlement<'_>) -> Result<Conversion, AppError> {
    match settlement {
        Settlement::Paid(payment) => {
            // Re-read inside the transaction; only a PAID payment converts
            let current = queries::get_payment_by_id(tx, &payment.id)?
                .or_not_found(msg::PAYMENT_NOT_FOUND)?;
            if current.status != PaymentStatus::Paid {
                return Err(AppError::Conflict(format!(
                    "payment {} is {}, not paid",
                    current.id, current.status
                )));
            }
        }
        Settlement::NoPaymentRequired(_) => {}
    }

    let now = Utc::now().timestamp();
    match settlement.target() {
        PaymentTarget::PlanChange(id) => convert_plan_change(tx, id, &settlement, now),
        PaymentTarget::AddonSubscription(id) => convert_addon(tx, id, &settlement),
    }
}

fn check_payment_link(
    linked_payment_id: Option<&str>,
    settlement: &Settlement<'_>,
) -> Result<(), AppError> {
    let consistent = match settlement {
        Settlement::Paid(payment) => linked_payment_id == Some(payment.id.as_str()),
        Settlement::NoPaymentRequired(_) => linked_payment_id.is_none(),
    };
    if consistent {
        Ok(())
    } else {
        Err(AppError::Internal(
            "settlement does not match the target's payment".into(),
        ))
    }
}

fn convert_plan_change(
    tx: &Transaction<'_>,
    plan_change_id: &str,
    settlement: &Settlement<'_>,
    now: i64,
) -> Result<Conversion, AppError> {
    let change = queries::get_plan_change_by_id(tx, plan_change_id)?
        .or_not_found(msg::PLAN_CHANGE_NOT_FOUND)?;
    check_payment_link(change.payment_id.as_deref(), settlement)?;

    let plan = queries::get_plan_by_id(tx, &change.to_plan_id)?.or_not_found(msg::PLAN_NOT_FOUND)?;

    if !queries::complete_plan_change(tx, &change.id, now)? {
        tracing::debug!("Plan change {} already converted", change.id);
        return Ok(Conversion::AlreadyConverted);
    }

    if !queries::set_user_current_plan(tx, &change.user_id, &plan.id)? {
        return Err(AppError::NotFound(msg::USER_NOT_FOUND.into()));
    }

    let superseded = queries::supersede_active_subscriptions(tx, &change.user_id)?;
    let subscription = queries::create_subscription(tx, &change, &plan, now)?;

    tracing::info!(
        "User {} moved to plan {} (subscription {}, superseded {})",
        change.user_id,
        plan.id,
        subscription.id,
        superseded
    );

    Ok(Conversion::PlanChanged {
        user_id: change.user_id,
        plan_change_id: change.id,
        subscription,
        superseded,
    })
}

fn convert_addon(
    tx: &Transaction<'_>,
    addon_subscription_id: &str,
    settlement: &Settlement<'_>,
) -> Result<Conversion, AppError> {
    let sub = queries::get_addon_subscription_by_id(tx, addon_subscription_id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    check_payment_link(sub.payment_id.as_deref(), settlement)?;

    if !queries::activate_addon_subscription(tx, &sub.id)? {
        tracing::debug!("Add-on subscription {} already converted", sub.id);
        return Ok(Conversion::AlreadyConverted);
    }

    tracing::info!("Add-on subscription {} activated for user {}", sub.id, sub.user_id);

    Ok(Conversion::AddonActivated {
        user_id: sub.user_id,
        addon_subscription_id: sub.id,
    })
}

/// Publish the events for a committed conversion.
pub fn publish_conversion(notifier: &Notifier, conversion: &Conversion) {
    match conversion {
        Conversion::PlanChanged {
            user_id,
            plan_change_id,
            subscription,
            ..
        } => notifier.publish(NotificationEvent::new(
            EventKind::PlanChanged,
            user_id,
            plan_change_id,
            serde_json::json!({
                "plan_id": subscription.plan_id,
                "subscription_id": subscription.id,
                "start_at": subscription.start_at,
                "end_at": subscription.end_at,
            }),
        )),
        Conversion::AddonActivated {
            user_id,
            addon_subscription_id,
        } => notifier.publish(NotificationEvent::new(
            EventKind::AddonActivated,
            user_id,
            addon_subscription_id,
            serde_json::Value::Null,
        )),
        Conversion::AlreadyConverted => {}
    }
}

/// Publish the events for a committed payment transition.
pub fn publish_payment(notifier: &Notifier, payment: &PaymentRecord) {
    let kind = match payment.status {
        PaymentStatus::Paid => EventKind::PaymentPaid,
        PaymentStatus::Failed | PaymentStatus::Cancelled => EventKind::PaymentFailed,
        PaymentStatus::Pending | PaymentStatus::Expired => return,
    };
    notifier.publish(NotificationEvent::new(
        kind,
        &payment.user_id,
        &payment.id,
        serde_json::json!({
            "status": payment.status,
            "amount_cents": payment.amount_cents,
            "currency": payment.currency,
            "provider": payment.provider,
            "target": payment.target,
        }),
    ));
}
