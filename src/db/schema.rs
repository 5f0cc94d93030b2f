use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Plans (catalog)
        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            duration_days INTEGER NOT NULL CHECK (duration_days > 0),
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        );

        -- Users (owned upstream; current_plan_id is the only column written here)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            phone TEXT,
            current_plan_id TEXT REFERENCES plans(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Add-ons (catalog)
        CREATE TABLE IF NOT EXISTS addons (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            pricing_mode TEXT NOT NULL CHECK (pricing_mode IN ('time', 'usage')),
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            currency TEXT NOT NULL,
            billing_cycle_days INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,

            CHECK (pricing_mode = 'usage' OR billing_cycle_days > 0)
        );

        CREATE TABLE IF NOT EXISTS addon_pricing_tiers (
            id TEXT PRIMARY KEY,
            addon_id TEXT NOT NULL REFERENCES addons(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0)
        );
        CREATE INDEX IF NOT EXISTS idx_tiers_addon ON addon_pricing_tiers(addon_id);

        -- Payments: only 'pending' rows are ever updated.
        -- target_kind/target_id point at plan_change_requests or addon_subscriptions.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            target_kind TEXT NOT NULL CHECK (target_kind IN ('plan_change', 'addon_subscription')),
            target_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            currency TEXT NOT NULL,
            provider TEXT NOT NULL CHECK (provider IN ('fawry', 'paymob')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'paid', 'failed', 'cancelled', 'expired')),
            reference_number TEXT,
            transaction_id TEXT,
            expires_at INTEGER NOT NULL,
            paid_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_payments_reference
            ON payments(provider, reference_number) WHERE reference_number IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_payments_transaction ON payments(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_payments_target ON payments(target_kind, target_id);
        CREATE INDEX IF NOT EXISTS idx_payments_pending_expiry
            ON payments(expires_at) WHERE status = 'pending';

        -- Every reference a provider has issued for a payment, including ones
        -- superseded by a retried initiation
        CREATE TABLE IF NOT EXISTS payment_references (
            provider TEXT NOT NULL,
            reference_number TEXT NOT NULL,
            payment_id TEXT NOT NULL REFERENCES payments(id),
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, reference_number)
        );
        CREATE INDEX IF NOT EXISTS idx_payment_references_payment
            ON payment_references(payment_id);

        CREATE TABLE IF NOT EXISTS plan_change_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            from_plan_id TEXT REFERENCES plans(id),
            to_plan_id TEXT NOT NULL REFERENCES plans(id),
            payment_id TEXT REFERENCES payments(id),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'completed', 'rejected')),
            reason TEXT,
            completed_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_plan_changes_user ON plan_change_requests(user_id);

        -- Base plan subscriptions; at most one 'active' row per user
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            plan_id TEXT NOT NULL REFERENCES plans(id),
            plan_change_id TEXT NOT NULL UNIQUE REFERENCES plan_change_requests(id),
            payment_id TEXT REFERENCES payments(id),
            status TEXT NOT NULL CHECK (status IN ('active', 'superseded')),
            start_at INTEGER NOT NULL,
            end_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active
            ON subscriptions(user_id) WHERE status = 'active';

        -- Exactly one of end_at (time mode) / usage_limit (usage mode) is set
        CREATE TABLE IF NOT EXISTS addon_subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            addon_id TEXT NOT NULL REFERENCES addons(id),
            tier_id TEXT REFERENCES addon_pricing_tiers(id),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'active', 'expired', 'cancelled', 'suspended')),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            total_price_cents INTEGER NOT NULL CHECK (total_price_cents >= 0),
            currency TEXT NOT NULL,
            start_at INTEGER NOT NULL,
            end_at INTEGER,
            usage_limit INTEGER,
            current_usage INTEGER NOT NULL DEFAULT 0,
            payment_id TEXT REFERENCES payments(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            CHECK ((end_at IS NULL) <> (usage_limit IS NULL)),
            CHECK (usage_limit IS NULL OR current_usage <= usage_limit)
        );
        CREATE INDEX IF NOT EXISTS idx_addon_subs_user ON addon_subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_addon_subs_active_end
            ON addon_subscriptions(end_at) WHERE status = 'active';

        -- Append-only usage log
        CREATE TABLE IF NOT EXISTS usage_logs (
            id TEXT PRIMARY KEY,
            addon_subscription_id TEXT NOT NULL REFERENCES addon_subscriptions(id),
            amount INTEGER NOT NULL CHECK (amount > 0),
            description TEXT NOT NULL,
            metadata TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_logs_sub ON usage_logs(addon_subscription_id);
        "#,
    )
}

/// Connection pragmas applied to every pooled connection.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        "#,
    )
}
