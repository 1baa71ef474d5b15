#![allow(clippy::result_large_err)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Inspectra Billing Module
//!
//! Keeps the subscription table in sync with the billing provider and answers
//! entitlement questions for the inspection app.
//!
//! ## Features
//!
//! - **Plan Catalog**: Compiled free / pro / business plans and their limits
//! - **Subscription State**: Idempotent upserts and status updates keyed by user and external id
//! - **Usage Accounting**: Properties, reports per period and photos per property, recomputed on demand
//! - **Entitlements**: Fail-closed allow / deny decisions with remaining capacity
//! - **Webhooks**: Signature-verified provider events applied to the subscription table
//! - **Checkout & Portal**: Hosted provider sessions behind a gateway trait

pub mod checkout;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod gateway;
pub mod period;
pub mod plans;
pub mod portal;
pub mod signature;
pub mod store;
pub mod subscriptions;
pub mod usage;
pub mod webhooks;

use std::sync::Arc;

// Checkout
pub use checkout::{BillingInterval, CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{
    Capacity, Decision, DenyReason, EntitlementGuard, EntitlementState, EntitlementSummary, Feature,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ParsedEvent, WebhookEvent};

// Gateway
pub use gateway::{BillingGateway, StripeGateway};

// Period
pub use period::BillingPeriod;

// Plans
pub use plans::{Limitations, Plan, PlanCatalog};

// Portal
pub use portal::{PortalResponse, PortalService};

// Store
pub use store::{
    InMemorySubscriptionRepository, PgSubscriptionRepository, Subscription, SubscriptionRepository,
};

// Subscriptions
pub use subscriptions::{SubscriptionStore, UpdateOutcome};

// Usage
pub use usage::{InMemoryUsageSource, PgUsageSource, UsageAccountant, UsageSnapshot, UsageSource};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookOutcome};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub catalog: Arc<PlanCatalog>,
    pub subscriptions: SubscriptionStore,
    pub usage: UsageAccountant,
    pub entitlements: EntitlementGuard,
    pub checkout: CheckoutService,
    pub portal: PortalService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }

    /// Postgres-backed service talking to Stripe
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let config = stripe.config().clone();

        Self::with_backends(
            config,
            Arc::new(PlanCatalog::builtin()),
            Arc::new(PgSubscriptionRepository::new(pool.clone())),
            Arc::new(PgUsageSource::new(pool)),
            Arc::new(StripeGateway::new(stripe)),
        )
    }

    /// Assemble the service from explicit backends
    pub fn with_backends(
        config: StripeConfig,
        catalog: Arc<PlanCatalog>,
        repository: Arc<dyn SubscriptionRepository>,
        usage_source: Arc<dyn UsageSource>,
        gateway: Arc<dyn BillingGateway>,
    ) -> Self {
        let subscriptions = SubscriptionStore::new(repository);
        let usage = UsageAccountant::new(usage_source, subscriptions.clone());

        Self {
            entitlements: EntitlementGuard::new(
                catalog.clone(),
                subscriptions.clone(),
                usage.clone(),
            ),
            checkout: CheckoutService::new(gateway.clone(), config.clone(), catalog.clone()),
            portal: PortalService::new(gateway, config.clone()),
            webhooks: WebhookHandler::new(subscriptions.clone(), catalog.clone(), config),
            catalog,
            subscriptions,
            usage,
        }
    }
}
