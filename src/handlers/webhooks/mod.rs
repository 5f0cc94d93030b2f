pub mod common;
pub mod fawry;
pub mod paymob;

pub use fawry::handle_fawry_webhook;
pub use paymob::handle_paymob_webhook;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/fawry", post(handle_fawry_webhook))
        .route("/webhooks/paymob", post(handle_paymob_webhook))
}
