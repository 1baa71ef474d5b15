//! Billing provider gateway
//!
//! Hosted checkout and customer portal sessions are created through the
//! [`BillingGateway`] seam so the HTTP layer and tests never talk to Stripe
//! directly.

use async_trait::async_trait;
use inspectra_shared::UserId;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData,
    CustomerId,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::PRICE_ID_METADATA_KEY;

/// Validated input for a hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub user_id: UserId,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCheckoutSession {
    pub session_id: String,
    pub url: Option<String>,
}

/// Validated input for a customer portal session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSessionRequest {
    pub customer_id: String,
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPortalSession {
    pub url: String,
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession>;

    async fn create_portal_session(
        &self,
        request: &PortalSessionRequest,
    ) -> BillingResult<CreatedPortalSession>;
}

/// Stripe-backed gateway
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        let user_id = request.user_id.to_string();

        // The webhook reads the user from client_reference_id and the plan
        // from metadata.price_id
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.clone());
        metadata.insert(PRICE_ID_METADATA_KEY.to_string(), request.price_id.clone());

        let params = CreateCheckoutSession {
            mode: Some(CheckoutSessionMode::Subscription),
            client_reference_id: Some(&user_id),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(metadata.clone()),
                ..Default::default()
            }),
            metadata: Some(metadata),
            allow_promotion_codes: Some(true),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %request.user_id,
            session_id = %session.id,
            price_id = %request.price_id,
            "Created checkout session"
        );

        Ok(CreatedCheckoutSession {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn create_portal_session(
        &self,
        request: &PortalSessionRequest,
    ) -> BillingResult<CreatedPortalSession> {
        let customer_id = request
            .customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;

        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(&request.return_url);

        let session = BillingPortalSession::create(self.stripe.inner(), params).await?;

        tracing::info!(customer_id = %session.customer, "Created billing portal session");

        Ok(CreatedPortalSession { url: session.url })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records requests and answers with canned sessions
    #[derive(Default)]
    pub struct RecordingGateway {
        pub checkouts: Mutex<Vec<CheckoutSessionRequest>>,
        pub portals: Mutex<Vec<PortalSessionRequest>>,
        pub fail: bool,
    }

    impl RecordingGateway {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl BillingGateway for RecordingGateway {
        async fn create_checkout_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> BillingResult<CreatedCheckoutSession> {
            if self.fail {
                return Err(BillingError::StripeApi("connection reset".into()));
            }
            let mut checkouts = self.checkouts.lock().await;
            checkouts.push(request.clone());
            Ok(CreatedCheckoutSession {
                session_id: format!("cs_test_{}", checkouts.len()),
                url: Some("https://checkout.stripe.test/session".to_string()),
            })
        }

        async fn create_portal_session(
            &self,
            request: &PortalSessionRequest,
        ) -> BillingResult<CreatedPortalSession> {
            if self.fail {
                return Err(BillingError::StripeApi("connection reset".into()));
            }
            self.portals.lock().await.push(request.clone());
            Ok(CreatedPortalSession {
                url: format!("https://billing.stripe.test/p/{}", request.customer_id),
            })
        }
    }
}
