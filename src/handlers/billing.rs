use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::billing::{self, UsageReceipt};
use crate::billing::requests::{AddonSubscribeResult, PlanChangeResult, RetryResult};
use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{EntityId, JsonBody, UserId};
use crate::notify::{EventKind, NotificationEvent};
use crate::payments::PaymentProvider;

fn parse_provider(provider: Option<&str>) -> Result<Option<PaymentProvider>> {
    provider
        .map(|p| {
            p.parse::<PaymentProvider>()
                .map_err(|_| AppError::BadRequest(msg::INVALID_PROVIDER.into()))
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
pub struct PlanChangeRequestBody {
    pub to_plan_id: String,
    /// Defaults to the first configured provider
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn create_plan_change(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    JsonBody(body): JsonBody<PlanChangeRequestBody>,
) -> Result<(StatusCode, Json<PlanChangeResult>)> {
    let provider = parse_provider(body.provider.as_deref())?;
    let result = billing::request_plan_change(&state, &user_id, &body.to_plan_id, provider).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeAddonBody {
    pub quantity: i64,
    #[serde(default)]
    pub tier_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn subscribe_addon(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    EntityId(addon_id): EntityId,
    JsonBody(body): JsonBody<SubscribeAddonBody>,
) -> Result<(StatusCode, Json<AddonSubscribeResult>)> {
    let provider = parse_provider(body.provider.as_deref())?;
    let result = billing::subscribe_addon(
        &state,
        &user_id,
        &addon_id,
        body.quantity,
        body.tier_id.as_deref(),
        provider,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct UsageReportBody {
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

pub async fn report_usage(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    EntityId(subscription_id): EntityId,
    JsonBody(body): JsonBody<UsageReportBody>,
) -> Result<Json<UsageReceipt>> {
    let mut conn = state.db.get()?;
    let receipt = billing::record_usage(
        &mut conn,
        &user_id,
        &subscription_id,
        body.amount,
        &body.description,
        body.metadata.as_ref(),
    )?;

    if receipt.limit_reached() {
        state.notifier.publish(NotificationEvent::new(
            EventKind::UsageLimitReached,
            &user_id,
            &subscription_id,
            serde_json::json!({ "usage_limit": receipt.usage_limit }),
        ));
    }

    Ok(Json(receipt))
}

pub async fn retry_payment(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    EntityId(payment_id): EntityId,
) -> Result<Json<RetryResult>> {
    Ok(Json(billing::retry_payment(&state, &user_id, &payment_id).await?))
}
