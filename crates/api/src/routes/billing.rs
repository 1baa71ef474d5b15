//! Billing routes: provider webhook, hosted checkout and customer portal

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use inspectra_billing::{CheckoutResponse, PortalResponse, WebhookOutcome};
use inspectra_shared::UserId;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Header carrying the provider's webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Provider webhook endpoint
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    tracing::debug!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::InvalidSignature
        })?;

    let outcome = state
        .billing
        .webhooks
        .handle(&body, signature)
        .await
        .map_err(|e| {
            if e.is_retryable() {
                tracing::error!(error = %e, "Webhook handling failed - provider will retry");
            } else {
                tracing::warn!(error = %e, "Webhook rejected");
            }
            ApiError::from(e)
        })?;

    match &outcome {
        WebhookOutcome::Handled {
            event_id, update, ..
        } => tracing::info!(
            event_id = %event_id,
            event_type = %outcome.event_type(),
            applied = update.is_applied(),
            "Stripe webhook processed"
        ),
        WebhookOutcome::NoOp {
            event_id, reason, ..
        } => tracing::info!(
            event_id = %event_id,
            event_type = %outcome.event_type(),
            reason = %reason,
            "Stripe webhook acknowledged without changes"
        ),
        WebhookOutcome::Ignored { event_id, .. } => tracing::debug!(
            event_id = %event_id,
            event_type = %outcome.event_type(),
            "Stripe webhook ignored"
        ),
    }

    Ok(Json(WebhookAck { received: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub price_id: Option<String>,
    pub user_id: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Create a checkout session for a subscription
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CreateCheckoutRequest>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let Json(req) = payload?;

    let price_id = required(req.price_id, "priceId")?;
    let user_id: UserId = required(req.user_id, "userId")?
        .parse()
        .map_err(|_| ApiError::Validation("userId must be a UUID".to_string()))?;

    let response = state
        .billing
        .checkout
        .create_checkout(user_id, &price_id, req.success_url, req.cancel_url)
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortalRequest {
    pub customer_id: Option<String>,
    pub return_url: Option<String>,
}

/// Create a billing portal session
pub async fn create_portal_session(
    State(state): State<AppState>,
    payload: Result<Json<CreatePortalRequest>, JsonRejection>,
) -> ApiResult<Json<PortalResponse>> {
    let Json(req) = payload?;
    let customer_id = required(req.customer_id, "customerId")?;

    let response = state
        .billing
        .portal
        .create_portal_session(&customer_id, req.return_url)
        .await?;

    Ok(Json(response))
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{} is required", field)))
}
