use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::signature::{PaymobSignedFields, verify_paymob_callback};
use super::{
    CallbackOutcome, Customer, GatewayError, Initiation, PROVIDER_TIMEOUT_SECS, ParsedCallback,
    PaymentGateway, PaymentProvider, ensure_success,
};
use crate::models::PaymentRecord;

/// Lifetime of a Paymob payment key, in seconds.
const PAYMENT_KEY_EXPIRATION_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct PaymobConfig {
    pub base_url: String,
    pub api_key: String,
    pub integration_id: i64,
    pub iframe_id: String,
    pub hmac_secret: String,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    api_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    auth_token: &'a str,
    delivery_needed: bool,
    amount_cents: i64,
    currency: &'a str,
    merchant_order_id: &'a str,
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
}

#[derive(Debug, Serialize)]
struct PaymentKeyRequest<'a> {
    auth_token: &'a str,
    amount_cents: i64,
    expiration: i64,
    order_id: i64,
    billing_data: BillingData<'a>,
    currency: &'a str,
    integration_id: i64,
}

/// Paymob requires every billing field; unknown ones are sent as "NA".
#[derive(Debug, Serialize)]
struct BillingData<'a> {
    first_name: &'a str,
    last_name: &'a str,
    email: &'a str,
    phone_number: &'a str,
    apartment: &'a str,
    floor: &'a str,
    street: &'a str,
    building: &'a str,
    city: &'a str,
    country: &'a str,
    state: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

/// Processed-transaction callback: `{"type": "TRANSACTION", "obj": {...}}`.
#[derive(Debug, Deserialize)]
pub struct PaymobCallback {
    #[serde(rename = "type")]
    pub kind: String,
    pub obj: PaymobTransaction,
    /// Some integrations send the digest in the body instead of the query string
    #[serde(default)]
    pub hmac: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymobTransaction {
    pub id: i64,
    pub pending: bool,
    pub success: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub order: PaymobOrder,
    #[serde(default)]
    pub is_voided: bool,
    #[serde(default)]
    pub is_refunded: bool,
}

#[derive(Debug, Deserialize)]
pub struct PaymobOrder {
    pub id: i64,
    #[serde(default)]
    pub merchant_order_id: Option<String>,
}

impl PaymobTransaction {
    /// Only `success` is covered by the digest, so it alone picks the final
    /// outcome. `pending` and `is_voided` are unsigned and can only hold the
    /// payment where it is.
    pub fn outcome(&self) -> CallbackOutcome {
        if self.pending || self.is_voided {
            CallbackOutcome::Pending
        } else if self.success {
            CallbackOutcome::Success
        } else {
            CallbackOutcome::Failure
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymobClient {
    client: Client,
    base_url: String,
    api_key: String,
    integration_id: i64,
    iframe_id: String,
    hmac_secret: String,
}

impl PaymobClient {
    pub fn new(config: &PaymobConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            integration_id: config.integration_id,
            iframe_id: config.iframe_id.clone(),
            hmac_secret: config.hmac_secret.clone(),
        }
    }

    async fn post_json<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .send()
            .await?;
        let response = ensure_success(PaymentProvider::Paymob, response).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("unreadable Paymob response: {}", e)))
    }

    /// auth token -> order registration -> payment key -> iframe URL
    async fn checkout(
        &self,
        payment: &PaymentRecord,
        customer: &Customer,
    ) -> Result<Initiation, GatewayError> {
        let auth: AuthResponse = self
            .post_json("/api/auth/tokens", &AuthRequest { api_key: &self.api_key })
            .await?;

        let order: OrderResponse = self
            .post_json(
                "/api/ecommerce/orders",
                &OrderRequest {
                    auth_token: &auth.token,
                    delivery_needed: false,
                    amount_cents: payment.amount_cents,
                    currency: &payment.currency,
                    merchant_order_id: &payment.id,
                    items: Vec::new(),
                },
            )
            .await?;

        let (first_name, last_name) = split_name(&customer.name);
        let key: PaymentKeyResponse = self
            .post_json(
                "/api/acceptance/payment_keys",
                &PaymentKeyRequest {
                    auth_token: &auth.token,
                    amount_cents: payment.amount_cents,
                    expiration: PAYMENT_KEY_EXPIRATION_SECS,
                    order_id: order.id,
                    billing_data: BillingData {
                        first_name,
                        last_name,
                        email: &customer.email,
                        phone_number: customer.phone.as_deref().unwrap_or("NA"),
                        apartment: "NA",
                        floor: "NA",
                        street: "NA",
                        building: "NA",
                        city: "NA",
                        country: "EG",
                        state: "NA",
                    },
                    currency: &payment.currency,
                    integration_id: self.integration_id,
                },
            )
            .await?;

        Ok(Initiation {
            reference_number: order.id.to_string(),
            redirect_url: Some(format!(
                "{}/api/acceptance/iframes/{}?payment_token={}",
                self.base_url, self.iframe_id, key.token
            )),
        })
    }

    /// Parse a processed callback. The digest comes from the `hmac` query
    /// parameter when present, otherwise from the body's `hmac` field.
    pub fn parse_processed_callback(&self, payload: &[u8], signature: Option<&str>) -> ParsedCallback {
        let callback: PaymobCallback = match serde_json::from_slice(payload) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("Unparseable Paymob callback: {}", e);
                return ParsedCallback::rejected(PaymentProvider::Paymob);
            }
        };

        if !callback.kind.eq_ignore_ascii_case("TRANSACTION") {
            return ParsedCallback::rejected(PaymentProvider::Paymob);
        }

        let Some(supplied) = signature
            .filter(|s| !s.is_empty())
            .or(callback.hmac.as_deref())
        else {
            return ParsedCallback::rejected(PaymentProvider::Paymob);
        };

        let txn = &callback.obj;
        let amount_cents = txn.amount_cents.to_string();
        let order_id = txn.order.id.to_string();
        let fields = PaymobSignedFields {
            amount_cents: &amount_cents,
            currency: &txn.currency,
            success: if txn.success { "true" } else { "false" },
            order_id: &order_id,
            merchant_order_id: txn.order.merchant_order_id.as_deref().unwrap_or(""),
        };
        let verified = verify_paymob_callback(&fields, &self.hmac_secret, supplied);

        ParsedCallback {
            provider: PaymentProvider::Paymob,
            reference_number: Some(order_id),
            transaction_id: Some(txn.id.to_string()),
            outcome: txn.outcome(),
            amount_cents: Some(txn.amount_cents),
            verified,
        }
    }
}

fn split_name(name: &str) -> (&str, &str) {
    let name = name.trim();
    match name.split_once(' ') {
        Some((first, last)) if !last.trim().is_empty() => (first, last.trim()),
        _ if !name.is_empty() => (name, "NA"),
        _ => ("NA", "NA"),
    }
}

impl PaymentGateway for PaymobClient {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paymob
    }

    fn initiate_payment<'a>(
        &'a self,
        payment: &'a PaymentRecord,
        customer: &'a Customer,
        _description: &'a str,
    ) -> BoxFuture<'a, Result<Initiation, GatewayError>> {
        Box::pin(self.checkout(payment, customer))
    }

    fn parse_callback(&self, payload: &[u8], signature: Option<&str>) -> ParsedCallback {
        self.parse_processed_callback(payload, signature)
    }
}
