use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;
use crate::payments::PaymentProvider;

use super::from_row::{
    ADDON_COLS, ADDON_SUB_COLS, PAYMENT_COLS, PLAN_CHANGE_COLS, PLAN_COLS, SUBSCRIPTION_COLS,
    TIER_COLS, USAGE_LOG_COLS, USER_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = EntityType::User.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, email, name, phone, current_plan_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5)",
        params![&id, &input.email, &input.name, &input.phone, now],
    )?;

    Ok(User {
        id,
        email: input.email.clone(),
        name: input.name.clone(),
        phone: input.phone.clone(),
        current_plan_id: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .map_err(Into::into)
}

/// Move the user's current-plan pointer. Returns false if the user does not exist.
pub fn set_user_current_plan(conn: &Connection, user_id: &str, plan_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE users SET current_plan_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![plan_id, now(), user_id],
    )?;
    Ok(affected > 0)
}

// ============ Plans ============

pub fn create_plan(conn: &Connection, input: &CreatePlan) -> Result<Plan> {
    let id = EntityType::Plan.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO plans (id, name, price_cents, currency, duration_days, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![&id, &input.name, input.price_cents, &input.currency, input.duration_days, now],
    )?;

    Ok(Plan {
        id,
        name: input.name.clone(),
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        duration_days: input.duration_days,
        active: true,
        created_at: now,
    })
}

pub fn get_plan_by_id(conn: &Connection, id: &str) -> Result<Option<Plan>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plans WHERE id = ?1", PLAN_COLS),
        &[&id],
    )
}

pub fn set_plan_active(conn: &Connection, id: &str, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE plans SET active = ?1 WHERE id = ?2",
        params![active as i32, id],
    )?;
    Ok(affected > 0)
}

// ============ Add-ons ============

pub fn create_addon(conn: &Connection, input: &CreateAddon) -> Result<Addon> {
    let id = EntityType::Addon.gen_id();
    let now = now();
    let billing_cycle_days = match input.pricing_mode {
        PricingMode::Time => input.billing_cycle_days,
        PricingMode::Usage => None,
    };

    conn.execute(
        "INSERT INTO addons (id, name, pricing_mode, price_cents, currency, billing_cycle_days, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            &id,
            &input.name,
            input.pricing_mode.as_ref(),
            input.price_cents,
            &input.currency,
            billing_cycle_days,
            now
        ],
    )?;

    Ok(Addon {
        id,
        name: input.name.clone(),
        pricing_mode: input.pricing_mode,
        price_cents: input.price_cents,
        currency: input.currency.clone(),
        billing_cycle_days,
        active: true,
        created_at: now,
    })
}

pub fn get_addon_by_id(conn: &Connection, id: &str) -> Result<Option<Addon>> {
    query_one(
        conn,
        &format!("SELECT {} FROM addons WHERE id = ?1", ADDON_COLS),
        &[&id],
    )
}

pub fn create_pricing_tier(
    conn: &Connection,
    addon_id: &str,
    name: &str,
    price_cents: i64,
) -> Result<AddonPricingTier> {
    let id = EntityType::PricingTier.gen_id();

    conn.execute(
        "INSERT INTO addon_pricing_tiers (id, addon_id, name, price_cents) VALUES (?1, ?2, ?3, ?4)",
        params![&id, addon_id, name, price_cents],
    )?;

    Ok(AddonPricingTier {
        id,
        addon_id: addon_id.to_string(),
        name: name.to_string(),
        price_cents,
    })
}

/// Look up a tier, scoped to its add-on so a tier of another add-on never matches.
pub fn get_pricing_tier(
    conn: &Connection,
    addon_id: &str,
    tier_id: &str,
) -> Result<Option<AddonPricingTier>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM addon_pricing_tiers WHERE id = ?1 AND addon_id = ?2",
            TIER_COLS
        ),
        &[&tier_id, &addon_id],
    )
}

// ============ Payments ============

pub fn create_payment(conn: &Connection, input: &CreatePayment) -> Result<PaymentRecord> {
    let id = EntityType::Payment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, user_id, target_kind, target_id, amount_cents, currency, provider, status, expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?9)",
        params![
            &id,
            &input.user_id,
            input.target.kind(),
            input.target.id(),
            input.amount_cents,
            &input.currency,
            input.provider.as_ref(),
            input.expires_at,
            now
        ],
    )?;

    Ok(PaymentRecord {
        id,
        user_id: input.user_id.clone(),
        target: input.target.clone(),
        amount_cents: input.amount_cents,
        currency: input.currency.clone(),
        provider: input.provider,
        status: PaymentStatus::Pending,
        reference_number: None,
        transaction_id: None,
        expires_at: input.expires_at,
        paid_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<PaymentRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

/// Look up a payment by provider reference. A reference replaced by a retried
/// initiation still resolves to its payment.
pub fn get_payment_by_reference(
    conn: &Connection,
    provider: PaymentProvider,
    reference_number: &str,
) -> Result<Option<PaymentRecord>> {
    let current = query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE provider = ?1 AND reference_number = ?2",
            PAYMENT_COLS
        ),
        &[&provider.as_ref(), &reference_number],
    )?;
    if current.is_some() {
        return Ok(current);
    }
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE provider = ?1 AND id =
                (SELECT payment_id FROM payment_references
                 WHERE provider = ?1 AND reference_number = ?2)",
            PAYMENT_COLS
        ),
        &[&provider.as_ref(), &reference_number],
    )
}

/// All references ever issued for a payment, oldest first.
pub fn list_payment_references(conn: &Connection, payment_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT reference_number FROM payment_references
         WHERE payment_id = ?1 ORDER BY created_at, rowid",
    )?;
    let refs = stmt
        .query_map([payment_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(refs)
}

pub fn get_payment_by_transaction_id(
    conn: &Connection,
    provider: PaymentProvider,
    transaction_id: &str,
) -> Result<Option<PaymentRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payments WHERE provider = ?1 AND transaction_id = ?2",
            PAYMENT_COLS
        ),
        &[&provider.as_ref(), &transaction_id],
    )
}

/// Record the provider reference returned by initiation.
/// Only a pending payment accepts a (new) reference; returns whether it was stored.
/// The reference is also kept in the history so callbacks on it keep resolving
/// after a retry replaces it.
pub fn set_payment_reference(conn: &Connection, id: &str, reference_number: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let now = now();
    let affected = tx.execute(
        "UPDATE payments SET reference_number = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![reference_number, now, id],
    )?;
    if affected == 0 {
        return Ok(false);
    }
    tx.execute(
        "INSERT OR IGNORE INTO payment_references (provider, reference_number, payment_id, created_at)
         SELECT provider, reference_number, id, ?2 FROM payments WHERE id = ?1",
        params![id, now],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Atomically move a payment out of PENDING.
///
/// Returns true only for the caller whose update actually changed the row;
/// a payment that is already terminal (or does not exist) yields false.
/// Moving a payment *to* pending is never valid and is refused as a no-op.
pub fn transition_payment_status(
    conn: &Connection,
    id: &str,
    new_status: PaymentStatus,
    transaction_id: Option<&str>,
) -> Result<bool> {
    if new_status == PaymentStatus::Pending {
        return Ok(false);
    }

    let now = now();
    let paid_at = (new_status == PaymentStatus::Paid).then_some(now);

    let affected = conn.execute(
        "UPDATE payments
         SET status = ?1,
             transaction_id = COALESCE(?2, transaction_id),
             paid_at = COALESCE(?3, paid_at),
             updated_at = ?4
         WHERE id = ?5 AND status = 'pending'",
        params![new_status.as_ref(), transaction_id, paid_at, now, id],
    )?;
    Ok(affected > 0)
}

/// Expire every pending payment whose deadline has passed. Returns the count.
pub fn expire_stale_payments(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE payments SET status = 'expired', updated_at = ?1
         WHERE status = 'pending' AND expires_at <= ?1",
        params![now],
    )?;
    Ok(affected)
}

/// PAID payments whose target is still unconverted and were paid at or before `paid_before`.
pub fn list_unconverted_paid_payments(
    conn: &Connection,
    paid_before: i64,
) -> Result<Vec<PaymentRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM payments
             WHERE status = 'paid' AND paid_at <= ?1
               AND (
                 (target_kind = 'plan_change' AND EXISTS (
                    SELECT 1 FROM plan_change_requests r
                    WHERE r.id = payments.target_id AND r.status IN ('pending', 'approved')))
                 OR
                 (target_kind = 'addon_subscription' AND EXISTS (
                    SELECT 1 FROM addon_subscriptions s
                    WHERE s.id = payments.target_id AND s.status = 'pending'))
               )
             ORDER BY paid_at",
            PAYMENT_COLS
        ),
        &[&paid_before],
    )
}

// ============ Plan changes ============

pub fn create_plan_change_with_id(
    conn: &Connection,
    id: &str,
    input: &CreatePlanChange,
    payment_id: Option<&str>,
) -> Result<PlanChangeRequest> {
    let now = now();

    conn.execute(
        "INSERT INTO plan_change_requests (id, user_id, from_plan_id, to_plan_id, payment_id, status, reason, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?7)",
        params![
            id,
            &input.user_id,
            &input.from_plan_id,
            &input.to_plan_id,
            payment_id,
            &input.reason,
            now
        ],
    )?;

    Ok(PlanChangeRequest {
        id: id.to_string(),
        user_id: input.user_id.clone(),
        from_plan_id: input.from_plan_id.clone(),
        to_plan_id: input.to_plan_id.clone(),
        payment_id: payment_id.map(String::from),
        status: PlanChangeStatus::Pending,
        reason: input.reason.clone(),
        completed_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_plan_change_by_id(conn: &Connection, id: &str) -> Result<Option<PlanChangeRequest>> {
    query_one(
        conn,
        &format!("SELECT {} FROM plan_change_requests WHERE id = ?1", PLAN_CHANGE_COLS),
        &[&id],
    )
}

/// Mark a plan change COMPLETED. Only pending/approved requests move; returns
/// false when another caller already completed (or rejected) it.
pub fn complete_plan_change(conn: &Connection, id: &str, completed_at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE plan_change_requests SET status = 'completed', completed_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status IN ('pending', 'approved')",
        params![completed_at, id],
    )?;
    Ok(affected > 0)
}

/// Reject pending plan changes whose payment ended without being paid.
/// The reason records the payment's final status (e.g. "payment expired").
pub fn reject_plan_changes_with_dead_payments(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE plan_change_requests
         SET status = 'rejected',
             reason = 'payment ' || (SELECT p.status FROM payments p WHERE p.id = plan_change_requests.payment_id),
             updated_at = ?1
         WHERE status IN ('pending', 'approved')
           AND payment_id IN (SELECT id FROM payments WHERE status IN ('failed', 'cancelled', 'expired'))",
        params![now()],
    )?;
    Ok(affected)
}

// ============ Subscriptions ============

/// Supersede the user's active subscription(s). Returns how many were replaced.
pub fn supersede_active_subscriptions(conn: &Connection, user_id: &str) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE subscriptions SET status = 'superseded' WHERE user_id = ?1 AND status = 'active'",
        params![user_id],
    )?;
    Ok(affected)
}

pub fn create_subscription(
    conn: &Connection,
    change: &PlanChangeRequest,
    plan: &Plan,
    start_at: i64,
) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let end_at = start_at + plan.duration_days * 86_400;

    conn.execute(
        "INSERT INTO subscriptions (id, user_id, plan_id, plan_change_id, payment_id, status, start_at, end_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?6)",
        params![
            &id,
            &change.user_id,
            &plan.id,
            &change.id,
            &change.payment_id,
            start_at,
            end_at
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: change.user_id.clone(),
        plan_id: plan.id.clone(),
        plan_change_id: change.id.clone(),
        payment_id: change.payment_id.clone(),
        status: SubscriptionStatus::Active,
        start_at,
        end_at,
        created_at: start_at,
    })
}

pub fn get_active_subscription(conn: &Connection, user_id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 AND status = 'active'",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

pub fn list_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY created_at, rowid",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

// ============ Add-on subscriptions ============

pub fn create_addon_subscription_with_id(
    conn: &Connection,
    id: &str,
    input: &CreateAddonSubscription,
    payment_id: Option<&str>,
) -> Result<AddonSubscription> {
    let now = now();
    let end_at = input.entitlement.end_at();
    let usage_limit = input.entitlement.usage_limit();

    conn.execute(
        "INSERT INTO addon_subscriptions (id, user_id, addon_id, tier_id, status, quantity, total_price_cents, currency, start_at, end_at, usage_limit, current_usage, payment_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?12)",
        params![
            id,
            &input.user_id,
            &input.addon_id,
            &input.tier_id,
            input.quantity,
            input.total_price_cents,
            &input.currency,
            input.start_at,
            end_at,
            usage_limit,
            payment_id,
            now
        ],
    )?;

    Ok(AddonSubscription {
        id: id.to_string(),
        user_id: input.user_id.clone(),
        addon_id: input.addon_id.clone(),
        tier_id: input.tier_id.clone(),
        status: AddonSubscriptionStatus::Pending,
        quantity: input.quantity,
        total_price_cents: input.total_price_cents,
        currency: input.currency.clone(),
        start_at: input.start_at,
        end_at,
        usage_limit,
        current_usage: 0,
        payment_id: payment_id.map(String::from),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_addon_subscription_by_id(
    conn: &Connection,
    id: &str,
) -> Result<Option<AddonSubscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM addon_subscriptions WHERE id = ?1", ADDON_SUB_COLS),
        &[&id],
    )
}

/// PENDING -> ACTIVE. Returns false if the subscription was not pending.
pub fn activate_addon_subscription(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE addon_subscriptions SET status = 'active', updated_at = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

/// Cancel pending add-on subscriptions whose payment ended without being paid.
pub fn cancel_addon_subscriptions_with_dead_payments(conn: &Connection) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE addon_subscriptions SET status = 'cancelled', updated_at = ?1
         WHERE status = 'pending'
           AND payment_id IN (SELECT id FROM payments WHERE status IN ('failed', 'cancelled', 'expired'))",
        params![now()],
    )?;
    Ok(affected)
}

/// Add `amount` to the running usage counter, but only while the result stays
/// within the limit and the subscription is active. Returns false when the
/// guard rejected the increment; nothing is written in that case.
pub fn increment_addon_usage(conn: &Connection, id: &str, amount: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE addon_subscriptions
         SET current_usage = current_usage + ?1, updated_at = ?2
         WHERE id = ?3
           AND status = 'active'
           AND usage_limit IS NOT NULL
           AND current_usage + ?1 <= usage_limit",
        params![amount, now(), id],
    )?;
    Ok(affected > 0)
}

/// Expire active time-mode subscriptions that ended before `now`. Returns the count.
pub fn expire_addon_subscriptions(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE addon_subscriptions SET status = 'expired', updated_at = ?1
         WHERE status = 'active' AND end_at IS NOT NULL AND end_at < ?1",
        params![now],
    )?;
    Ok(affected)
}

// ============ Usage log ============

pub fn create_usage_log(
    conn: &Connection,
    addon_subscription_id: &str,
    amount: i64,
    description: &str,
    metadata: Option<&str>,
) -> Result<UsageLogEntry> {
    let id = EntityType::UsageLog.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO usage_logs (id, addon_subscription_id, amount, description, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, addon_subscription_id, amount, description, metadata, now],
    )?;

    Ok(UsageLogEntry {
        id,
        addon_subscription_id: addon_subscription_id.to_string(),
        amount,
        description: description.to_string(),
        metadata: metadata.map(String::from),
        created_at: now,
    })
}

pub fn list_usage_logs(conn: &Connection, addon_subscription_id: &str) -> Result<Vec<UsageLogEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM usage_logs WHERE addon_subscription_id = ?1 ORDER BY created_at, rowid",
            USAGE_LOG_COLS
        ),
        &[&addon_subscription_id],
    )
}
