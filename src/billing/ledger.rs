//! Usage metering for usage-mode add-on subscriptions, and expiry of
//! time-mode subscriptions.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::db::queries;
use crate::error::{AppError, OptionExt, msg};
use crate::models::{AddonSubscriptionStatus, UsageLogEntry};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("usage amount must be positive")]
    InvalidAmount,

    #[error("add-on subscription not found")]
    NotFound,

    #[error("add-on subscription is {0}")]
    NotActive(AddonSubscriptionStatus),

    #[error("add-on subscription has no usage limit")]
    NotUsageMetered,

    #[error("usage limit exceeded: {current} + {requested} > {limit}")]
    LimitExceeded {
        current: i64,
        requested: i64,
        limit: i64,
    },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Store(e.into())
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InvalidAmount => AppError::BadRequest(msg::INVALID_USAGE_AMOUNT.into()),
            LedgerError::NotFound => AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()),
            LedgerError::NotActive(_) => AppError::Conflict(msg::SUBSCRIPTION_NOT_ACTIVE.into()),
            LedgerError::NotUsageMetered => AppError::BadRequest(msg::NOT_USAGE_METERED.into()),
            LedgerError::LimitExceeded { .. } => {
                AppError::Conflict(msg::USAGE_LIMIT_EXCEEDED.into())
            }
            LedgerError::Store(inner) => inner,
        }
    }
}

/// Result of an accepted usage report.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReceipt {
    pub entry: UsageLogEntry,
    pub current_usage: i64,
    pub usage_limit: i64,
    pub remaining: i64,
}

impl UsageReceipt {
    pub fn limit_reached(&self) -> bool {
        self.remaining == 0
    }
}

/// Record `amount` units against a usage-mode subscription owned by `user_id`.
///
/// The counter increment and log append commit together or not at all. A
/// report that would push usage past the limit is refused whole.
pub fn record_usage(
    conn: &mut Connection,
    user_id: &str,
    subscription_id: &str,
    amount: i64,
    description: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<UsageReceipt, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount);
    }
    let metadata = metadata
        .map(serde_json::to_string)
        .transpose()
        .map_err(AppError::from)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let sub = queries::get_addon_subscription_by_id(&tx, subscription_id)?
        .filter(|s| s.user_id == user_id)
        .ok_or(LedgerError::NotFound)?;

    if sub.status != AddonSubscriptionStatus::Active {
        return Err(LedgerError::NotActive(sub.status));
    }
    let Some(limit) = sub.usage_limit else {
        return Err(LedgerError::NotUsageMetered);
    };

    if !queries::increment_addon_usage(&tx, &sub.id, amount)? {
        return Err(LedgerError::LimitExceeded {
            current: sub.current_usage,
            requested: amount,
            limit,
        });
    }

    let entry = queries::create_usage_log(&tx, &sub.id, amount, description, metadata.as_deref())?;
    let current_usage = queries::get_addon_subscription_by_id(&tx, &sub.id)?
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
        .current_usage;

    tx.commit()?;

    tracing::debug!(
        "Recorded {} units on {} ({}/{})",
        amount,
        sub.id,
        current_usage,
        limit
    );

    Ok(UsageReceipt {
        entry,
        current_usage,
        usage_limit: limit,
        remaining: limit - current_usage,
    })
}

/// Expire active time-mode subscriptions whose end has passed. Idempotent.
pub fn sweep_expired(conn: &Connection, now: i64) -> Result<usize, AppError> {
    let count = queries::expire_addon_subscriptions(conn, now)?;
    if count > 0 {
        tracing::info!("Expired {} add-on subscriptions", count);
    }
    Ok(count)
}
