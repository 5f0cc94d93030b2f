//! Request extractors for the billing API and provider callbacks.
//!
//! Every rejection is an [`AppError`], so malformed input gets the same
//! `{"error", "details"}` body as application errors.

use axum::{
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::{Deserialize, de::DeserializeOwned};

use crate::error::AppError;
use crate::id::is_valid_prefixed_id;

/// JSON request body. Responses use `axum::Json` directly.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(body) = axum::Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(body))
    }
}

/// The single prefixed id in a route such as `/payments/{id}/retry`.
///
/// A malformed id cannot name a stored entity, so it is rejected as not found
/// without touching the database.
#[derive(Debug, Clone)]
pub struct EntityId(pub String);

impl<S> FromRequestParts<S> for EntityId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(id) =
            axum::extract::Path::<String>::from_request_parts(parts, state).await?;
        if is_valid_prefixed_id(&id) {
            Ok(EntityId(id))
        } else {
            Err(AppError::NotFound("Resource not found".into()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignatureParams {
    #[serde(default)]
    hmac: Option<String>,
}

/// Digest a provider sends in the `hmac` query parameter, if any.
#[derive(Debug, Clone, Default)]
pub struct QuerySignature(pub Option<String>);

impl<S> FromRequestParts<S> for QuerySignature
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(params) =
            axum::extract::Query::<SignatureParams>::from_request_parts(parts, state).await?;
        Ok(QuerySignature(params.hmac.filter(|h| !h.is_empty())))
    }
}

/// Authenticated caller, injected upstream as the `x-user-id` header.
///
/// Authentication itself happens before requests reach this service; the
/// header is trusted once it carries a well-formed user id.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

pub const USER_ID_HEADER: &str = "x-user-id";

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| is_valid_prefixed_id(id))
            .map(|id| UserId(id.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}
