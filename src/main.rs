use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use tenantpay::billing::run_sweeps;
use tenantpay::config::Config;
use tenantpay::db::{AppState, create_pool, init_db, queries};
use tenantpay::handlers;
use tenantpay::models::{CreateAddon, CreatePlan, CreateUser, PricingMode};
use tenantpay::notify::Notifier;
use tenantpay::payments::PaymentGateways;

/// How long `--sweep-once` waits for notification delivery before exiting.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "tenantpay")]
#[command(about = "Payment reconciliation and plan/add-on transition engine")]
struct Cli {
    /// Seed the database with dev data (plans, add-ons, a user)
    #[arg(long)]
    seed: bool,

    /// Run every sweep once and exit without starting the server
    #[arg(long)]
    sweep_once: bool,
}

/// Seeds the database with dev data for testing.
/// Only runs in dev mode and when no users exist.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_users(&conn).expect("Failed to count users");
    if count > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    let currency = state.config.default_currency.clone();

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let free = queries::create_plan(
        &conn,
        &CreatePlan {
            name: "Free".to_string(),
            price_cents: 0,
            currency: currency.clone(),
            duration_days: 30,
        },
    )
    .expect("Failed to create free plan");
    let pro = queries::create_plan(
        &conn,
        &CreatePlan {
            name: "Pro".to_string(),
            price_cents: 10_000,
            currency: currency.clone(),
            duration_days: 30,
        },
    )
    .expect("Failed to create pro plan");

    let storage = queries::create_addon(
        &conn,
        &CreateAddon {
            name: "Extra Storage".to_string(),
            pricing_mode: PricingMode::Time,
            price_cents: 2_500,
            currency: currency.clone(),
            billing_cycle_days: Some(30),
        },
    )
    .expect("Failed to create time add-on");
    let sms = queries::create_addon(
        &conn,
        &CreateAddon {
            name: "SMS Credits".to_string(),
            pricing_mode: PricingMode::Usage,
            price_cents: 50,
            currency: currency.clone(),
            billing_cycle_days: None,
        },
    )
    .expect("Failed to create usage add-on");
    let bulk = queries::create_pricing_tier(&conn, &sms.id, "Bulk", 35)
        .expect("Failed to create pricing tier");

    let user = queries::create_user(
        &conn,
        &CreateUser {
            email: "dev@tenantpay.local".to_string(),
            name: "Dev Tenant".to_string(),
            phone: Some("01000000000".to_string()),
        },
    )
    .expect("Failed to create dev user");

    tracing::info!("Plans: {} (free), {} (pro)", free.id, pro.id);
    tracing::info!("Add-ons: {} (time), {} (usage)", storage.id, sms.id);
    tracing::info!("");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  user_id: {}", user.id);
    println!("  free_plan_id: {}", free.id);
    println!("  pro_plan_id: {}", pro.id);
    println!("  time_addon_id: {}", storage.id);
    println!("  usage_addon_id: {}", sms.id);
    println!("  usage_tier_id: {}", bulk.id);
    println!("--- END COPY ---");
    println!();
}

fn sweep_now(state: &AppState) {
    let now = chrono::Utc::now().timestamp();
    match state.db.get() {
        Ok(mut conn) => {
            if let Err(e) = run_sweeps(
                &mut conn,
                now,
                state.config.reconcile_grace_secs,
                &state.notifier,
            ) {
                tracing::warn!("Sweep failed: {}", e);
            }
        }
        Err(e) => {
            tracing::warn!("Failed to get db connection for sweep: {}", e);
        }
    }
}

/// Spawns the background task that expires payments and subscriptions and
/// reconciles stuck conversions.
fn spawn_sweep_task(state: AppState) {
    let interval = Duration::from_secs(state.config.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let state = state.clone();
            // Sweeps hold a pooled connection and run blocking SQLite work
            if let Err(e) = tokio::task::spawn_blocking(move || sweep_now(&state)).await {
                tracing::error!("Sweep task panicked: {}", e);
            }
        }
    });

    tracing::info!(
        "Background sweep task started (runs every {} seconds)",
        interval.as_secs()
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let gateways = PaymentGateways::from_config(config.fawry.as_ref(), config.paymob.as_ref());
    for (name, configured) in [
        ("Fawry", gateways.fawry.is_some()),
        ("Paymob", gateways.paymob.is_some()),
    ] {
        if configured {
            tracing::info!("{} gateway configured", name);
        } else {
            tracing::warn!("{} gateway not configured", name);
        }
    }

    let state = AppState {
        db: db_pool,
        notifier: Notifier::new(config.notify_webhook_url.clone()),
        gateways,
        config: Arc::new(config),
    };

    if cli.seed {
        if !state.config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set TENANTPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if cli.sweep_once {
        sweep_now(&state);
        if !state.notifier.flush(NOTIFY_FLUSH_TIMEOUT).await {
            tracing::warn!(
                "{} notification(s) still undelivered at exit",
                state.notifier.in_flight()
            );
        }
        return;
    }

    spawn_sweep_task(state.clone());

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = state.config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("tenantpay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
