mod fawry;
mod paymob;
pub mod signature;
mod util;

pub use fawry::*;
pub use paymob::*;
pub use util::{format_amount, parse_amount_cents};

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::error::{AppError, msg};
use crate::models::PaymentRecord;

/// Timeout applied to every outbound provider request.
pub(crate) const PROVIDER_TIMEOUT_SECS: u64 = 15;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentProvider {
    Fawry,
    Paymob,
}

/// Who is paying, as the provider needs to see it.
#[derive(Debug, Clone)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Result of a successful initiation.
#[derive(Debug, Clone, Serialize)]
pub struct Initiation {
    pub reference_number: String,
    /// Hosted checkout URL (Paymob iframe); Fawry pays by reference at a kiosk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network failure, timeout or provider 5xx. Safe to retry.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request (4xx or an error status in the body).
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_client_error() => GatewayError::Rejected(e.to_string()),
            _ => GatewayError::Unavailable(e.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(detail) => {
                tracing::warn!("Payment initiation unavailable: {}", detail);
                AppError::ServiceUnavailable(msg::INITIATION_RETRY_LATER.into())
            }
            GatewayError::Rejected(detail) => {
                tracing::warn!("Payment initiation rejected: {}", detail);
                AppError::UnprocessableEntity(msg::INITIATION_REJECTED.into())
            }
        }
    }
}

/// Map a provider HTTP response to success, rejection (4xx) or unavailability.
pub(crate) async fn ensure_success(
    provider: PaymentProvider,
    response: reqwest::Response,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", provider, status, body);
    if status.is_client_error() {
        Err(GatewayError::Rejected(detail))
    } else {
        Err(GatewayError::Unavailable(detail))
    }
}

/// Provider-neutral outcome carried by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Success,
    Failure,
    Cancelled,
    Expired,
    /// Still pending at the provider, or a status we do not recognise
    Pending,
}

/// A callback reduced to the fields reconciliation needs.
///
/// `verified` is false whenever the signature did not match or the payload did
/// not fit the provider's schema; such callbacks must never mutate state.
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    pub provider: PaymentProvider,
    pub reference_number: Option<String>,
    pub transaction_id: Option<String>,
    pub outcome: CallbackOutcome,
    pub amount_cents: Option<i64>,
    pub verified: bool,
}

impl ParsedCallback {
    /// A callback that could not be parsed at all.
    pub fn rejected(provider: PaymentProvider) -> Self {
        Self {
            provider,
            reference_number: None,
            transaction_id: None,
            outcome: CallbackOutcome::Pending,
            amount_cents: None,
            verified: false,
        }
    }
}

/// Outbound initiation plus inbound callback parsing for one provider.
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    fn initiate_payment<'a>(
        &'a self,
        payment: &'a PaymentRecord,
        customer: &'a Customer,
        description: &'a str,
    ) -> BoxFuture<'a, Result<Initiation, GatewayError>>;

    /// Parse and verify a raw callback body. Never fails; bad input yields `verified = false`.
    fn parse_callback(&self, payload: &[u8], signature: Option<&str>) -> ParsedCallback;
}

/// The configured gateways, keyed by provider.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    pub fawry: Option<Arc<dyn PaymentGateway>>,
    pub paymob: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn from_config(fawry: Option<&FawryConfig>, paymob: Option<&PaymobConfig>) -> Self {
        Self {
            fawry: fawry.map(|c| Arc::new(FawryClient::new(c)) as Arc<dyn PaymentGateway>),
            paymob: paymob.map(|c| Arc::new(PaymobClient::new(c)) as Arc<dyn PaymentGateway>),
        }
    }

    pub fn get(&self, provider: PaymentProvider) -> Option<&Arc<dyn PaymentGateway>> {
        match provider {
            PaymentProvider::Fawry => self.fawry.as_ref(),
            PaymentProvider::Paymob => self.paymob.as_ref(),
        }
    }

    pub fn require(&self, provider: PaymentProvider) -> crate::error::Result<&Arc<dyn PaymentGateway>> {
        self.get(provider)
            .ok_or_else(|| AppError::BadRequest(msg::PROVIDER_NOT_CONFIGURED.into()))
    }

    /// Default provider when a request does not name one: Fawry first, then Paymob.
    pub fn default_provider(&self) -> Option<PaymentProvider> {
        if self.fawry.is_some() {
            Some(PaymentProvider::Fawry)
        } else if self.paymob.is_some() {
            Some(PaymentProvider::Paymob)
        } else {
            None
        }
    }
}
