use axum::{body::Bytes, extract::State, response::Response};

use super::common::handle_callback;
use crate::db::AppState;
use crate::payments::PaymentProvider;

/// Fawry server notification. The signature travels in the body (`messageSignature`).
pub async fn handle_fawry_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    handle_callback(&state, PaymentProvider::Fawry, &body, None)
}
