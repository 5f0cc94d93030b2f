use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::signature::{fawry_charge_signature, verify_fawry_callback};
use super::util::json_amount_cents;
use super::{
    CallbackOutcome, Customer, GatewayError, Initiation, PROVIDER_TIMEOUT_SECS, ParsedCallback,
    PaymentGateway, PaymentProvider, ensure_success, format_amount,
};
use crate::models::PaymentRecord;

const CHARGE_PATH: &str = "/ECommerceWeb/Fawry/payments/charge";
const PAYMENT_METHOD: &str = "PAYATFAWRY";

#[derive(Debug, Clone)]
pub struct FawryConfig {
    pub base_url: String,
    pub merchant_code: String,
    pub security_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest<'a> {
    merchant_code: &'a str,
    merchant_ref_num: &'a str,
    customer_profile_id: &'a str,
    customer_name: &'a str,
    customer_email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_mobile: Option<&'a str>,
    payment_method: &'a str,
    amount: String,
    currency_code: &'a str,
    description: &'a str,
    /// Milliseconds since epoch
    payment_expiry: i64,
    charge_items: Vec<ChargeItem<'a>>,
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeItem<'a> {
    item_id: &'a str,
    description: &'a str,
    price: String,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargeResponse {
    #[serde(default)]
    reference_number: Option<String>,
    #[serde(default)]
    status_code: Option<i64>,
    #[serde(default)]
    status_description: Option<String>,
}

/// Server-to-server notification body sent by Fawry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FawryNotification {
    pub fawry_ref_number: String,
    pub merchant_ref_number: String,
    pub order_status: String,
    pub payment_amount: serde_json::Value,
    pub message_signature: String,
    /// Fawry's spelling
    #[serde(default, rename = "paymentRefrenceNumber")]
    pub payment_reference_number: Option<String>,
    #[serde(default)]
    pub order_amount: Option<serde_json::Value>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

/// Map a Fawry `orderStatus` to a provider-neutral outcome.
pub fn fawry_outcome(order_status: &str) -> CallbackOutcome {
    match order_status.to_ascii_uppercase().as_str() {
        "PAID" | "DELIVERED" => CallbackOutcome::Success,
        "FAILED" => CallbackOutcome::Failure,
        "CANCELED" | "CANCELLED" => CallbackOutcome::Cancelled,
        "EXPIRED" => CallbackOutcome::Expired,
        _ => CallbackOutcome::Pending,
    }
}

#[derive(Debug, Clone)]
pub struct FawryClient {
    client: Client,
    base_url: String,
    merchant_code: String,
    security_key: String,
}

impl FawryClient {
    pub fn new(config: &FawryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            merchant_code: config.merchant_code.clone(),
            security_key: config.security_key.clone(),
        }
    }

    async fn charge(
        &self,
        payment: &PaymentRecord,
        customer: &Customer,
        description: &str,
    ) -> Result<Initiation, GatewayError> {
        let amount = format_amount(payment.amount_cents);
        let signature =
            fawry_charge_signature(&self.merchant_code, &payment.id, &amount, &self.security_key);

        let request = ChargeRequest {
            merchant_code: &self.merchant_code,
            merchant_ref_num: &payment.id,
            customer_profile_id: &customer.id,
            customer_name: &customer.name,
            customer_email: &customer.email,
            customer_mobile: customer.phone.as_deref(),
            payment_method: PAYMENT_METHOD,
            amount: amount.clone(),
            currency_code: &payment.currency,
            description,
            payment_expiry: payment.expires_at * 1000,
            charge_items: vec![ChargeItem {
                item_id: payment.target.id(),
                description,
                price: amount,
                quantity: 1,
            }],
            signature,
        };

        let response = self
            .client
            .post(format!("{}{}", self.base_url, CHARGE_PATH))
            .json(&request)
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .send()
            .await?;
        let response = ensure_success(PaymentProvider::Fawry, response).await?;

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("unreadable Fawry response: {}", e)))?;

        // Fawry reports business errors with HTTP 200 and a non-200 statusCode
        match body.status_code {
            Some(200) | None => {}
            Some(code) => {
                return Err(GatewayError::Rejected(format!(
                    "Fawry status {}: {}",
                    code,
                    body.status_description.unwrap_or_default()
                )));
            }
        }

        let reference_number = body
            .reference_number
            .filter(|r| !r.is_empty())
            .ok_or_else(|| GatewayError::Rejected("Fawry response had no referenceNumber".into()))?;

        Ok(Initiation {
            reference_number,
            redirect_url: None,
        })
    }

    /// Parse a notification body and check its `messageSignature`.
    pub fn parse_notification(&self, payload: &[u8]) -> ParsedCallback {
        let notification: FawryNotification = match serde_json::from_slice(payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Unparseable Fawry notification: {}", e);
                return ParsedCallback::rejected(PaymentProvider::Fawry);
            }
        };

        let Some(amount_cents) = json_amount_cents(&notification.payment_amount) else {
            return ParsedCallback::rejected(PaymentProvider::Fawry);
        };

        let verified = verify_fawry_callback(
            &self.merchant_code,
            &notification.fawry_ref_number,
            &format_amount(amount_cents),
            &notification.order_status,
            &self.security_key,
            &notification.message_signature,
        );

        let transaction_id = notification
            .payment_reference_number
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| notification.fawry_ref_number.clone());

        ParsedCallback {
            provider: PaymentProvider::Fawry,
            outcome: fawry_outcome(&notification.order_status),
            reference_number: Some(notification.fawry_ref_number),
            transaction_id: Some(transaction_id),
            amount_cents: Some(amount_cents),
            verified,
        }
    }
}

impl PaymentGateway for FawryClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Fawry
    }

    fn initiate_payment<'a>(
        &'a self,
        payment: &'a PaymentRecord,
        customer: &'a Customer,
        description: &'a str,
    ) -> BoxFuture<'a, Result<Initiation, GatewayError>> {
        Box::pin(self.charge(payment, customer, description))
    }

    fn parse_callback(&self, payload: &[u8], _signature: Option<&str>) -> ParsedCallback {
        self.parse_notification(payload)
    }
}
