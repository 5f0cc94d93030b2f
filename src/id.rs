//! Prefixed ID generation for tenantpay entities.
//!
//! All IDs use a `tp_` brand prefix so they can never collide with provider
//! identifiers (Fawry reference numbers, Paymob order/transaction ids).
//!
//! Format: `tp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &[
    "tp_usr_", "tp_plan_", "tp_addon_", "tp_tier_", "tp_pay_", "tp_pcr_", "tp_sub_", "tp_asub_",
    "tp_use_",
];

/// Validate that a string is a well-formed prefixed ID.
///
/// This is a cheap check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    User,
    Plan,
    Addon,
    PricingTier,
    Payment,
    PlanChange,
    Subscription,
    AddonSubscription,
    UsageLog,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "tp_usr",
            Self::Plan => "tp_plan",
            Self::Addon => "tp_addon",
            Self::PricingTier => "tp_tier",
            Self::Payment => "tp_pay",
            Self::PlanChange => "tp_pcr",
            Self::Subscription => "tp_sub",
            Self::AddonSubscription => "tp_asub",
            Self::UsageLog => "tp_use",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
