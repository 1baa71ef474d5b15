//! Customer billing portal

use std::sync::Arc;

use crate::checkout::non_empty;
use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, CreatedPortalSession, PortalSessionRequest};

/// Portal service for provider billing portal sessions
#[derive(Clone)]
pub struct PortalService {
    gateway: Arc<dyn BillingGateway>,
    config: StripeConfig,
}

impl PortalService {
    pub fn new(gateway: Arc<dyn BillingGateway>, config: StripeConfig) -> Self {
        Self { gateway, config }
    }

    /// Create a billing portal session for a customer
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: Option<String>,
    ) -> BillingResult<PortalResponse> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(BillingError::InvalidInput("customerId is required".to_string()));
        }

        let request = PortalSessionRequest {
            customer_id: customer_id.to_string(),
            return_url: non_empty(return_url).unwrap_or_else(|| self.config.default_return_url()),
        };

        let session = self.gateway.create_portal_session(&request).await?;
        Ok(PortalResponse::from(session))
    }
}

/// Response for creating a portal session
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortalResponse {
    pub url: String,
}

impl From<CreatedPortalSession> for PortalResponse {
    fn from(session: CreatedPortalSession) -> Self {
        Self { url: session.url }
    }
}
