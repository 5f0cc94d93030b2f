use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PricingMode {
    /// Billed per cycle; quantity buys that many cycles
    Time,
    /// Billed per unit; quantity is the usage allowance
    Usage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub id: String,
    pub name: String,
    pub pricing_mode: PricingMode,
    /// Per cycle (time mode) or per unit (usage mode)
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle_days: Option<i64>,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAddon {
    pub name: String,
    pub pricing_mode: PricingMode,
    pub price_cents: i64,
    pub currency: String,
    pub billing_cycle_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonPricingTier {
    pub id: String,
    pub addon_id: String,
    pub name: String,
    /// Replaces the add-on's unit price when selected
    pub price_cents: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddonSubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
    Suspended,
}

/// Entitlement window of an add-on subscription. Exactly one bound applies,
/// chosen at creation from the add-on's pricing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entitlement {
    Until(i64),
    Allowance(i64),
}

impl Entitlement {
    /// Time mode: `start + cycle_days * quantity` days. Usage mode: `quantity` units.
    ///
    /// `None` when the end of a time-mode window does not fit in a timestamp.
    pub fn compute(addon: &Addon, quantity: i64, start_at: i64) -> Option<Self> {
        match addon.pricing_mode {
            PricingMode::Time => {
                let cycle = addon.billing_cycle_days.unwrap_or(30);
                cycle
                    .checked_mul(quantity)
                    .and_then(|days| days.checked_mul(SECONDS_PER_DAY))
                    .and_then(|secs| start_at.checked_add(secs))
                    .map(Self::Until)
            }
            PricingMode::Usage => Some(Self::Allowance(quantity)),
        }
    }

    pub fn end_at(&self) -> Option<i64> {
        match self {
            Self::Until(ts) => Some(*ts),
            Self::Allowance(_) => None,
        }
    }

    pub fn usage_limit(&self) -> Option<i64> {
        match self {
            Self::Until(_) => None,
            Self::Allowance(limit) => Some(*limit),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonSubscription {
    pub id: String,
    pub user_id: String,
    pub addon_id: String,
    pub tier_id: Option<String>,
    pub status: AddonSubscriptionStatus,
    pub quantity: i64,
    pub total_price_cents: i64,
    pub currency: String,
    pub start_at: i64,
    pub end_at: Option<i64>,
    pub usage_limit: Option<i64>,
    pub current_usage: i64,
    pub payment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AddonSubscription {
    pub fn is_usage_metered(&self) -> bool {
        self.usage_limit.is_some()
    }

    pub fn remaining_usage(&self) -> Option<i64> {
        self.usage_limit.map(|limit| (limit - self.current_usage).max(0))
    }
}

#[derive(Debug, Clone)]
pub struct CreateAddonSubscription {
    pub user_id: String,
    pub addon_id: String,
    pub tier_id: Option<String>,
    pub quantity: i64,
    pub total_price_cents: i64,
    pub currency: String,
    pub start_at: i64,
    pub entitlement: Entitlement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: String,
    pub addon_subscription_id: String,
    pub amount: i64,
    pub description: String,
    /// Opaque JSON text supplied by the caller
    pub metadata: Option<String>,
    pub created_at: i64,
}
