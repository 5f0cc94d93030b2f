pub mod billing;
pub mod webhooks;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// All routes. Callers (end users) are identified by the upstream `x-user-id` header;
/// webhooks authenticate by provider signature.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/plan-changes", post(billing::create_plan_change))
        .route("/addons/{addon_id}/subscribe", post(billing::subscribe_addon))
        .route(
            "/addon-subscriptions/{id}/usage",
            post(billing::report_usage),
        )
        .route("/payments/{id}/retry", post(billing::retry_payment))
        .merge(webhooks::router())
}
