//! Billing error types

use inspectra_shared::SharedError;
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed request fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Webhook body or header did not authenticate against the shared secret
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// Authenticated webhook whose body does not match the expected event shape
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// The write would break a uniqueness rule of the stored data; retrying cannot succeed
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether the caller (or the provider, for webhooks) may safely retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::StripeApi(_) | BillingError::Database(_) | BillingError::Internal(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<SharedError> for BillingError {
    fn from(err: SharedError) -> Self {
        BillingError::InvalidInput(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BillingError::Database("timeout".into()).is_retryable());
        assert!(BillingError::StripeApi("502".into()).is_retryable());
        assert!(!BillingError::WebhookSignatureInvalid.is_retryable());
        assert!(!BillingError::MalformedPayload("x".into()).is_retryable());
        assert!(!BillingError::InvalidInput("x".into()).is_retryable());
        assert!(!BillingError::UnknownPlan("gold".into()).is_retryable());
        assert!(!BillingError::Conflict("sub_1".into()).is_retryable());
    }
}
