//! API error types and handling

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use inspectra_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Webhook authentication
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Stored data conflicts
    #[error("Conflict: {0}")]
    Conflict(String),

    // Upstream provider
    #[error("Billing provider error")]
    Provider,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) | ApiError::InvalidSignature => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Provider | ApiError::Database(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            // Validation
            ApiError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
            ApiError::InvalidSignature => ("INVALID_SIGNATURE", self.to_string()),

            // Stored data
            ApiError::Conflict(msg) => ("CONFLICT", msg.clone()),

            // Internal (details stay in the logs)
            ApiError::Provider => ("PROVIDER_ERROR", self.to_string()),
            ApiError::Database(_) => ("DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => ("INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            BillingError::MalformedPayload(msg) => ApiError::BadRequest(msg),
            BillingError::Conflict(msg) => {
                tracing::error!(error = %msg, "Write conflicts with stored data");
                ApiError::Conflict(msg)
            }
            BillingError::StripeApi(msg) => {
                tracing::error!(error = %msg, "Billing provider call failed");
                ApiError::Provider
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Database(msg)
            }
            BillingError::UnknownPlan(msg) => {
                tracing::error!(plan = %msg, "Subscription references a plan missing from the catalog");
                ApiError::Internal
            }
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing error");
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
