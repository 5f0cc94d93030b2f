use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Reason recorded on plan changes that settle without a payment.
pub const NO_PAYMENT_REQUIRED: &str = "NO_PAYMENT_REQUIRED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub duration_days: i64,
    pub active: bool,
    pub created_at: i64,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlan {
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub duration_days: i64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanChangeStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanChangeRequest {
    pub id: String,
    pub user_id: String,
    /// None when the user had no plan before this change
    pub from_plan_id: Option<String>,
    pub to_plan_id: String,
    /// None when the target plan is free
    pub payment_id: Option<String>,
    pub status: PlanChangeStatus,
    pub reason: Option<String>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreatePlanChange {
    pub user_id: String,
    pub from_plan_id: Option<String>,
    pub to_plan_id: String,
    pub reason: Option<String>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Superseded,
}

/// Materialized base-plan subscription, one ACTIVE row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: String,
    pub plan_change_id: String,
    pub payment_id: Option<String>,
    pub status: SubscriptionStatus,
    pub start_at: i64,
    pub end_at: i64,
    pub created_at: i64,
}
