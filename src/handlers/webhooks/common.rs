//! Shared callback handling for payment providers.
//!
//! Provider handlers only extract the raw body and signature; parsing,
//! verification and state changes all flow through [`handle_callback`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::billing::{ApplyOutcome, CoordinatorError, apply_callback, coordinator};
use crate::db::AppState;
use crate::payments::PaymentProvider;

#[derive(Debug, Serialize)]
pub struct WebhookReply {
    pub status: &'static str,
    pub message: &'static str,
}

/// Response for a callback: HTTP status plus `{"status", "message"}` body.
pub type WebhookResult = (StatusCode, Json<WebhookReply>);

fn reply(code: StatusCode, status: &'static str, message: &'static str) -> WebhookResult {
    (code, Json(WebhookReply { status, message }))
}

pub fn handle_callback(
    state: &AppState,
    provider: PaymentProvider,
    body: &[u8],
    signature: Option<&str>,
) -> Response {
    let Some(gateway) = state.gateways.get(provider) else {
        tracing::warn!("{} callback received but provider is not configured", provider);
        return reply(StatusCode::NOT_FOUND, "ignored", "Provider not configured").into_response();
    };

    let parsed = gateway.parse_callback(body, signature);

    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("DB pool error: {}", e);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, "error", "Database error")
                .into_response();
        }
    };

    let result = match apply_callback(&mut conn, &parsed) {
        Ok(ApplyOutcome::Applied {
            payment,
            conversion,
        }) => {
            coordinator::publish_payment(&state.notifier, &payment);
            if let Some(conversion) = &conversion {
                coordinator::publish_conversion(&state.notifier, conversion);
            }
            reply(StatusCode::OK, "processed", "Processed")
        }
        Ok(ApplyOutcome::Duplicate { .. }) => {
            reply(StatusCode::OK, "already_processed", "Already processed")
        }
        Ok(ApplyOutcome::LateSuccess { .. }) => {
            // Acknowledge so the provider stops redelivering; the coordinator raised the alert
            reply(StatusCode::OK, "late_success", "Payment already closed; flagged for review")
        }
        Ok(ApplyOutcome::StillPending { .. }) => {
            reply(StatusCode::OK, "pending", "Payment still pending")
        }
        Err(CoordinatorError::UnknownReference) => {
            tracing::warn!(
                %provider,
                reference = ?parsed.reference_number,
                "Callback for unknown payment reference"
            );
            reply(StatusCode::NOT_FOUND, "not_found", "Unknown payment reference")
        }
        Err(CoordinatorError::Rejected(reason)) => {
            tracing::warn!(
                security_event = true,
                %provider,
                reference = ?parsed.reference_number,
                reason,
                "Rejected payment callback"
            );
            reply(StatusCode::UNAUTHORIZED, "rejected", "Signature verification failed")
        }
        Err(CoordinatorError::ConversionFailed { payment, source }) => {
            // Payment is PAID; the reconciliation sweep retries the conversion
            coordinator::publish_payment(&state.notifier, &payment);
            tracing::error!(
                alert = true,
                payment_id = %payment.id,
                "Payment PAID but conversion failed: {}",
                source
            );
            reply(StatusCode::INTERNAL_SERVER_ERROR, "error", "Conversion failed")
        }
        Err(CoordinatorError::Internal(e)) => {
            tracing::error!("Callback processing error: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, "error", "Internal error")
        }
    };

    result.into_response()
}
