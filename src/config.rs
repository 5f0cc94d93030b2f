use std::env;

use crate::payments::{FawryConfig, PaymobConfig};

const DEFAULT_PAYMENT_EXPIRY_HOURS: i64 = 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_RECONCILE_GRACE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Lifetime of a PENDING payment before the sweep expires it.
    pub payment_expiry_hours: i64,
    pub sweep_interval_secs: u64,
    /// How long a PAID payment may sit unconverted before reconciliation retries it.
    pub reconcile_grace_secs: i64,
    pub default_currency: String,
    pub notify_webhook_url: Option<String>,
    pub fawry: Option<FawryConfig>,
    pub paymob: Option<PaymobConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TENANTPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "tenantpay.db".to_string()),
            base_url,
            dev_mode,
            payment_expiry_hours: parse_env("PAYMENT_EXPIRY_HOURS")
                .unwrap_or(DEFAULT_PAYMENT_EXPIRY_HOURS),
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS")
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            reconcile_grace_secs: parse_env("RECONCILE_GRACE_SECS")
                .unwrap_or(DEFAULT_RECONCILE_GRACE_SECS),
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "EGP".to_string()),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            fawry: fawry_from_env(),
            paymob: paymob_from_env(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Fawry is configured only when both the merchant code and security key are present.
fn fawry_from_env() -> Option<FawryConfig> {
    let merchant_code = env::var("FAWRY_MERCHANT_CODE").ok()?;
    let security_key = env::var("FAWRY_SECURITY_KEY").ok()?;
    Some(FawryConfig {
        base_url: env::var("FAWRY_BASE_URL")
            .unwrap_or_else(|_| "https://atfawry.fawrystaging.com".to_string()),
        merchant_code,
        security_key,
    })
}

fn paymob_from_env() -> Option<PaymobConfig> {
    let api_key = env::var("PAYMOB_API_KEY").ok()?;
    let hmac_secret = env::var("PAYMOB_HMAC_SECRET").ok()?;
    let integration_id = parse_env("PAYMOB_INTEGRATION_ID")?;
    Some(PaymobConfig {
        base_url: env::var("PAYMOB_BASE_URL")
            .unwrap_or_else(|_| "https://accept.paymob.com".to_string()),
        api_key,
        integration_id,
        iframe_id: env::var("PAYMOB_IFRAME_ID").unwrap_or_default(),
        hmac_secret,
    })
}
