use axum::{body::Bytes, extract::State, response::Response};

use super::common::handle_callback;
use crate::db::AppState;
use crate::extractors::QuerySignature;
use crate::payments::PaymentProvider;

/// Paymob processed-transaction callback. The digest is normally in `?hmac=`.
pub async fn handle_paymob_webhook(
    State(state): State<AppState>,
    QuerySignature(hmac): QuerySignature,
    body: Bytes,
) -> Response {
    handle_callback(&state, PaymentProvider::Paymob, &body, hmac.as_deref())
}
