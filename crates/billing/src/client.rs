//! Stripe client configuration

use stripe::Client;

use crate::error::{BillingError, BillingResult};
use crate::plans::{BUSINESS_PLAN_ID, PRO_PLAN_ID};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each paid plan
    pub price_ids: PriceIds,
    /// Base URL for success/cancel/return redirects
    pub app_base_url: String,
}

/// Stripe price IDs for the paid plans
/// Plan hierarchy: Free (no price) → Pro → Business
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub pro: String,
    pub business: String,

    // Annual billing (optional)
    pub pro_annual: Option<String>,
    pub business_annual: Option<String>,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                pro: std::env::var("STRIPE_PRICE_PRO")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_PRO not set".to_string()))?,
                business: std::env::var("STRIPE_PRICE_BUSINESS").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_BUSINESS not set".to_string())
                })?,
                pro_annual: std::env::var("STRIPE_PRICE_PRO_ANNUAL").ok(),
                business_annual: std::env::var("STRIPE_PRICE_BUSINESS_ANNUAL").ok(),
            },
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Get the monthly price ID for a plan
    pub fn price_id_for_plan(&self, plan_id: &str) -> Option<&str> {
        match plan_id.to_lowercase().as_str() {
            PRO_PLAN_ID => Some(&self.price_ids.pro),
            BUSINESS_PLAN_ID => Some(&self.price_ids.business),
            _ => None,
        }
    }

    /// Get plan from price ID (handles both monthly and annual prices)
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<&'static str> {
        if price_id == self.price_ids.pro {
            Some(PRO_PLAN_ID)
        } else if price_id == self.price_ids.business {
            Some(BUSINESS_PLAN_ID)
        } else if self.price_ids.pro_annual.as_deref() == Some(price_id) {
            Some(PRO_PLAN_ID)
        } else if self.price_ids.business_annual.as_deref() == Some(price_id) {
            Some(BUSINESS_PLAN_ID)
        } else {
            None
        }
    }

    /// Check if a price ID is for annual billing
    pub fn is_annual_price(&self, price_id: &str) -> bool {
        self.price_ids.pro_annual.as_deref() == Some(price_id)
            || self.price_ids.business_annual.as_deref() == Some(price_id)
    }

    pub fn default_success_url(&self) -> String {
        format!(
            "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.app_base_url
        )
    }

    pub fn default_cancel_url(&self) -> String {
        format!("{}/billing/cancel", self.app_base_url)
    }

    pub fn default_return_url(&self) -> String {
        format!("{}/billing", self.app_base_url)
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_inspectra".to_string(),
        webhook_secret: "whsec_test_secret".to_string(),
        price_ids: PriceIds {
            pro: "price_pro_monthly".to_string(),
            business: "price_business_monthly".to_string(),
            pro_annual: Some("price_pro_annual".to_string()),
            business_annual: None,
        },
        app_base_url: "https://app.inspectra.test".to_string(),
    }
}
