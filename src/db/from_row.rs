//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to describe how they are built from a row
//! selected with the matching `*_COLS` constant.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str = "id, email, name, phone, current_plan_id, created_at, updated_at";

pub const PLAN_COLS: &str = "id, name, price_cents, currency, duration_days, active, created_at";

pub const ADDON_COLS: &str =
    "id, name, pricing_mode, price_cents, currency, billing_cycle_days, active, created_at";

pub const TIER_COLS: &str = "id, addon_id, name, price_cents";

pub const PAYMENT_COLS: &str = "id, user_id, target_kind, target_id, amount_cents, currency, provider, status, reference_number, transaction_id, expires_at, paid_at, created_at, updated_at";

pub const PLAN_CHANGE_COLS: &str = "id, user_id, from_plan_id, to_plan_id, payment_id, status, reason, completed_at, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str =
    "id, user_id, plan_id, plan_change_id, payment_id, status, start_at, end_at, created_at";

pub const ADDON_SUB_COLS: &str = "id, user_id, addon_id, tier_id, status, quantity, total_price_cents, currency, start_at, end_at, usage_limit, current_usage, payment_id, created_at, updated_at";

pub const USAGE_LOG_COLS: &str =
    "id, addon_subscription_id, amount, description, metadata, created_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            phone: row.get(3)?,
            current_plan_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

impl FromRow for Plan {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Plan {
            id: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            duration_days: row.get(4)?,
            active: row.get::<_, i32>(5)? != 0,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for Addon {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Addon {
            id: row.get(0)?,
            name: row.get(1)?,
            pricing_mode: parse_enum(row, 2, "pricing_mode")?,
            price_cents: row.get(3)?,
            currency: row.get(4)?,
            billing_cycle_days: row.get(5)?,
            active: row.get::<_, i32>(6)? != 0,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for AddonPricingTier {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AddonPricingTier {
            id: row.get(0)?,
            addon_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
        })
    }
}

impl FromRow for PaymentRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind: String = row.get(2)?;
        let target = PaymentTarget::from_parts(&kind, row.get(3)?).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                2,
                "target_kind".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;
        Ok(PaymentRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            target,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            provider: parse_enum(row, 6, "provider")?,
            status: parse_enum(row, 7, "status")?,
            reference_number: row.get(8)?,
            transaction_id: row.get(9)?,
            expires_at: row.get(10)?,
            paid_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl FromRow for PlanChangeRequest {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PlanChangeRequest {
            id: row.get(0)?,
            user_id: row.get(1)?,
            from_plan_id: row.get(2)?,
            to_plan_id: row.get(3)?,
            payment_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            reason: row.get(6)?,
            completed_at: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            plan_change_id: row.get(3)?,
            payment_id: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            start_at: row.get(6)?,
            end_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for AddonSubscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AddonSubscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            addon_id: row.get(2)?,
            tier_id: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            quantity: row.get(5)?,
            total_price_cents: row.get(6)?,
            currency: row.get(7)?,
            start_at: row.get(8)?,
            end_at: row.get(9)?,
            usage_limit: row.get(10)?,
            current_usage: row.get(11)?,
            payment_id: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

impl FromRow for UsageLogEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UsageLogEntry {
            id: row.get(0)?,
            addon_subscription_id: row.get(1)?,
            amount: row.get(2)?,
            description: row.get(3)?,
            metadata: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
