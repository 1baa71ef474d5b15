//! Hosted checkout

use std::sync::Arc;

use inspectra_shared::UserId;
use serde::Serialize;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, CheckoutSessionRequest, CreatedCheckoutSession};
use crate::plans::PlanCatalog;

/// Billing interval for a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Monthly,
    Annual,
}

/// Checkout service for creating provider checkout sessions
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn BillingGateway>,
    config: StripeConfig,
    catalog: Arc<PlanCatalog>,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn BillingGateway>,
        config: StripeConfig,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            gateway,
            config,
            catalog,
        }
    }

    /// Start a subscription checkout for `price_id`.
    ///
    /// The price must map to a plan in the catalog; redirect URLs default to
    /// the app's billing pages.
    pub async fn create_checkout(
        &self,
        user_id: UserId,
        price_id: &str,
        success_url: Option<String>,
        cancel_url: Option<String>,
    ) -> BillingResult<CheckoutResponse> {
        let price_id = price_id.trim();
        if price_id.is_empty() {
            return Err(BillingError::InvalidInput("priceId is required".to_string()));
        }

        let plan_id = self.config.plan_for_price_id(price_id).ok_or_else(|| {
            BillingError::InvalidInput(format!("Price {} is not offered", price_id))
        })?;
        let plan = self.catalog.resolve(plan_id)?;

        let interval = if self.config.is_annual_price(price_id) {
            BillingInterval::Annual
        } else {
            BillingInterval::Monthly
        };

        let request = CheckoutSessionRequest {
            user_id,
            price_id: price_id.to_string(),
            success_url: non_empty(success_url).unwrap_or_else(|| self.config.default_success_url()),
            cancel_url: non_empty(cancel_url).unwrap_or_else(|| self.config.default_cancel_url()),
        };

        let session = self.gateway.create_checkout_session(&request).await?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan.id,
            billing_interval = ?interval,
            session_id = %session.session_id,
            "Checkout started"
        );

        Ok(CheckoutResponse::from(session))
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Response for creating a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<CreatedCheckoutSession> for CheckoutResponse {
    fn from(session: CreatedCheckoutSession) -> Self {
        Self {
            session_id: session.session_id,
            url: session.url,
        }
    }
}
