use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::payments::PaymentProvider;

/// Lifecycle of a single payment attempt.
///
/// Only `Pending` may transition; every other status is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a payment pays for. Exactly one target per payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentTarget {
    PlanChange(String),
    AddonSubscription(String),
}

impl PaymentTarget {
    pub const PLAN_CHANGE: &'static str = "plan_change";
    pub const ADDON_SUBSCRIPTION: &'static str = "addon_subscription";

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanChange(_) => Self::PLAN_CHANGE,
            Self::AddonSubscription(_) => Self::ADDON_SUBSCRIPTION,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::PlanChange(id) | Self::AddonSubscription(id) => id,
        }
    }

    /// Rebuild a target from its stored (kind, id) columns.
    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            Self::PLAN_CHANGE => Some(Self::PlanChange(id)),
            Self::ADDON_SUBSCRIPTION => Some(Self::AddonSubscription(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub user_id: String,
    pub target: PaymentTarget,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    /// Provider reference returned at initiation (Fawry reference number, Paymob order id)
    pub reference_number: Option<String>,
    /// Provider transaction id, known once the callback arrives
    pub transaction_id: Option<String>,
    pub expires_at: i64,
    pub paid_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PaymentRecord {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub user_id: String,
    pub target: PaymentTarget,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub expires_at: i64,
}
