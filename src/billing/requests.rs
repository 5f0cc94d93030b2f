//! Creation of plan changes and add-on subscriptions together with their
//! payments, followed by provider initiation.
//!
//! The target and its PENDING payment are written in one transaction before
//! any provider call. Initiation failure leaves both in place: the payment can
//! be retried until it expires, after which the sweep ages the target out.

use chrono::Utc;
use rusqlite::TransactionBehavior;
use serde::Serialize;

use super::coordinator::{self, Conversion, Settlement};
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::id::EntityType;
use crate::models::{
    AddonSubscription, CreateAddonSubscription, CreatePayment, CreatePlanChange, Entitlement,
    NO_PAYMENT_REQUIRED, PaymentRecord, PaymentStatus, PaymentTarget, PlanChangeRequest,
    Subscription, User,
};
use crate::payments::{Customer, GatewayError, Initiation, PaymentGateway, PaymentProvider};

#[derive(Debug, Serialize)]
pub struct PlanChangeResult {
    pub plan_change: PlanChangeRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiation: Option<Initiation>,
    /// Present when the change completed synchronously (free plan)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Serialize)]
pub struct AddonSubscribeResult {
    pub addon_subscription: AddonSubscription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiation: Option<Initiation>,
}

#[derive(Debug, Serialize)]
pub struct RetryResult {
    pub payment: PaymentRecord,
    pub initiation: Initiation,
}

fn customer_for(user: &User) -> Customer {
    Customer {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        phone: user.phone.clone(),
    }
}

fn expiry_from(now: i64, hours: i64) -> i64 {
    now + hours * 3600
}

/// Pick the requested provider, or the default configured one.
fn choose_gateway(
    state: &AppState,
    provider: Option<PaymentProvider>,
) -> Result<std::sync::Arc<dyn PaymentGateway>> {
    let provider = match provider {
        Some(p) => p,
        None => state
            .gateways
            .default_provider()
            .ok_or_else(|| AppError::BadRequest(msg::PROVIDER_NOT_CONFIGURED.into()))?,
    };
    state.gateways.require(provider).cloned()
}

fn initiation_error(e: GatewayError, payment_id: &str) -> AppError {
    match AppError::from(e) {
        AppError::ServiceUnavailable(m) => {
            AppError::ServiceUnavailable(format!("{} (payment {})", m, payment_id))
        }
        AppError::UnprocessableEntity(m) => {
            AppError::UnprocessableEntity(format!("{} (payment {})", m, payment_id))
        }
        other => other,
    }
}

/// Call the provider and store the returned reference on the payment.
async fn initiate_and_record(
    state: &AppState,
    gateway: &dyn PaymentGateway,
    payment: &mut PaymentRecord,
    customer: &Customer,
    description: &str,
) -> Result<Initiation> {
    let initiation = gateway
        .initiate_payment(payment, customer, description)
        .await
        .map_err(|e| initiation_error(e, &payment.id))?;

    let conn = state.db.get()?;
    if queries::set_payment_reference(&conn, &payment.id, &initiation.reference_number)? {
        payment.reference_number = Some(initiation.reference_number.clone());
        tracing::info!(
            "Payment {} initiated with {} (reference {})",
            payment.id,
            payment.provider,
            initiation.reference_number
        );
    } else {
        tracing::warn!(
            "Payment {} left pending before its reference could be stored",
            payment.id
        );
    }
    Ok(initiation)
}

/// Request a move to `to_plan_id`.
///
/// A free target plan completes immediately without a payment. Otherwise the
/// plan change and its payment are created and the provider is called.
pub async fn request_plan_change(
    state: &AppState,
    user_id: &str,
    to_plan_id: &str,
    provider: Option<PaymentProvider>,
) -> Result<PlanChangeResult> {
    let now = Utc::now().timestamp();

    let (user, plan) = {
        let conn = state.db.get()?;
        let user = queries::get_user_by_id(&conn, user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
        let plan = queries::get_plan_by_id(&conn, to_plan_id)?.or_not_found(msg::PLAN_NOT_FOUND)?;
        (user, plan)
    };

    if !plan.active {
        return Err(AppError::BadRequest(msg::PLAN_INACTIVE.into()));
    }
    if user.current_plan_id.as_deref() == Some(plan.id.as_str()) {
        return Err(AppError::Conflict(msg::SAME_PLAN.into()));
    }

    let plan_change_id = EntityType::PlanChange.gen_id();
    let target = PaymentTarget::PlanChange(plan_change_id.clone());

    if plan.is_free() {
        let mut conn = state.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        queries::create_plan_change_with_id(
            &tx,
            &plan_change_id,
            &CreatePlanChange {
                user_id: user.id.clone(),
                from_plan_id: user.current_plan_id.clone(),
                to_plan_id: plan.id.clone(),
                reason: Some(NO_PAYMENT_REQUIRED.to_string()),
            },
            None,
        )?;
        let conversion = coordinator::convert_in(&tx, Settlement::NoPaymentRequired(&target))?;
        tx.commit()?;

        coordinator::publish_conversion(&state.notifier, &conversion);
        let plan_change = queries::get_plan_change_by_id(&conn, &plan_change_id)?
            .or_not_found(msg::PLAN_CHANGE_NOT_FOUND)?;
        let subscription = match conversion {
            Conversion::PlanChanged { subscription, .. } => Some(subscription),
            _ => None,
        };

        return Ok(PlanChangeResult {
            plan_change,
            payment: None,
            initiation: None,
            subscription,
        });
    }

    let gateway = choose_gateway(state, provider)?;

    let (plan_change, mut payment) = {
        let mut conn = state.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let payment = queries::create_payment(
            &tx,
            &CreatePayment {
                user_id: user.id.clone(),
                target,
                amount_cents: plan.price_cents,
                currency: plan.currency.clone(),
                provider: gateway.provider(),
                expires_at: expiry_from(now, state.config.payment_expiry_hours),
            },
        )?;
        let plan_change = queries::create_plan_change_with_id(
            &tx,
            &plan_change_id,
            &CreatePlanChange {
                user_id: user.id.clone(),
                from_plan_id: user.current_plan_id.clone(),
                to_plan_id: plan.id.clone(),
                reason: None,
            },
            Some(&payment.id),
        )?;
        tx.commit()?;
        (plan_change, payment)
    };

    let description = format!("Plan change to {}", plan.name);
    let initiation = initiate_and_record(
        state,
        gateway.as_ref(),
        &mut payment,
        &customer_for(&user),
        &description,
    )
    .await?;

    Ok(PlanChangeResult {
        plan_change,
        payment: Some(payment),
        initiation: Some(initiation),
        subscription: None,
    })
}

/// Subscribe the user to `quantity` of an add-on, optionally at a pricing tier.
pub async fn subscribe_addon(
    state: &AppState,
    user_id: &str,
    addon_id: &str,
    quantity: i64,
    tier_id: Option<&str>,
    provider: Option<PaymentProvider>,
) -> Result<AddonSubscribeResult> {
    if quantity <= 0 {
        return Err(AppError::BadRequest(msg::INVALID_QUANTITY.into()));
    }
    let now = Utc::now().timestamp();

    let (user, addon, tier) = {
        let conn = state.db.get()?;
        let user = queries::get_user_by_id(&conn, user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
        let addon =
            queries::get_addon_by_id(&conn, addon_id)?.or_not_found(msg::ADDON_NOT_FOUND)?;
        let tier = match tier_id {
            Some(tier_id) => Some(
                queries::get_pricing_tier(&conn, &addon.id, tier_id)?
                    .or_not_found(msg::TIER_NOT_FOUND)?,
            ),
            None => None,
        };
        (user, addon, tier)
    };

    if !addon.active {
        return Err(AppError::BadRequest(msg::ADDON_INACTIVE.into()));
    }

    let unit_price = tier.as_ref().map_or(addon.price_cents, |t| t.price_cents);
    let total_price_cents = unit_price
        .checked_mul(quantity)
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_QUANTITY.into()))?;

    let entitlement = Entitlement::compute(&addon, quantity, now)
        .ok_or_else(|| AppError::BadRequest(msg::INVALID_QUANTITY.into()))?;

    let subscription_id = EntityType::AddonSubscription.gen_id();
    let target = PaymentTarget::AddonSubscription(subscription_id.clone());
    let input = CreateAddonSubscription {
        user_id: user.id.clone(),
        addon_id: addon.id.clone(),
        tier_id: tier.as_ref().map(|t| t.id.clone()),
        quantity,
        total_price_cents,
        currency: addon.currency.clone(),
        start_at: now,
        entitlement,
    };

    if total_price_cents == 0 {
        let mut conn = state.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        queries::create_addon_subscription_with_id(&tx, &subscription_id, &input, None)?;
        let conversion = coordinator::convert_in(&tx, Settlement::NoPaymentRequired(&target))?;
        tx.commit()?;

        coordinator::publish_conversion(&state.notifier, &conversion);
        let addon_subscription = queries::get_addon_subscription_by_id(&conn, &subscription_id)?
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
        return Ok(AddonSubscribeResult {
            addon_subscription,
            payment: None,
            initiation: None,
        });
    }

    let gateway = choose_gateway(state, provider)?;

    let (addon_subscription, mut payment) = {
        let mut conn = state.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let payment = queries::create_payment(
            &tx,
            &CreatePayment {
                user_id: user.id.clone(),
                target,
                amount_cents: total_price_cents,
                currency: addon.currency.clone(),
                provider: gateway.provider(),
                expires_at: expiry_from(now, state.config.payment_expiry_hours),
            },
        )?;
        let sub =
            queries::create_addon_subscription_with_id(&tx, &subscription_id, &input, Some(&payment.id))?;
        tx.commit()?;
        (sub, payment)
    };

    let description = format!("{} x{}", addon.name, quantity);
    let initiation = initiate_and_record(
        state,
        gateway.as_ref(),
        &mut payment,
        &customer_for(&user),
        &description,
    )
    .await?;

    Ok(AddonSubscribeResult {
        addon_subscription,
        payment: Some(payment),
        initiation: Some(initiation),
    })
}

/// Re-run initiation for a payment that is still pending and unexpired.
pub async fn retry_payment(state: &AppState, user_id: &str, payment_id: &str) -> Result<RetryResult> {
    let now = Utc::now().timestamp();

    let (user, mut payment) = {
        let conn = state.db.get()?;
        let payment = queries::get_payment_by_id(&conn, payment_id)?
            .filter(|p| p.user_id == user_id)
            .or_not_found(msg::PAYMENT_NOT_FOUND)?;
        let user = queries::get_user_by_id(&conn, user_id)?.or_not_found(msg::USER_NOT_FOUND)?;
        (user, payment)
    };

    if payment.status != PaymentStatus::Pending {
        return Err(AppError::Conflict(msg::PAYMENT_NOT_PENDING.into()));
    }
    if payment.is_expired_at(now) {
        return Err(AppError::Conflict(msg::PAYMENT_EXPIRED.into()));
    }

    let gateway = state.gateways.require(payment.provider)?.clone();
    let description = match &payment.target {
        PaymentTarget::PlanChange(_) => "Plan change".to_string(),
        PaymentTarget::AddonSubscription(_) => "Add-on subscription".to_string(),
    };

    let initiation = initiate_and_record(
        state,
        gateway.as_ref(),
        &mut payment,
        &customer_for(&user),
        &description,
    )
    .await?;

    Ok(RetryResult {
        payment,
        initiation,
    })
}
