//! Application state

use std::sync::Arc;

use inspectra_billing::BillingService;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Billing core (subscriptions, usage, entitlements, webhooks)
    pub billing: Arc<BillingService>,
    /// `None` when the billing core runs on in-memory backends
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(config: Config, billing: BillingService, pool: PgPool) -> Self {
        Self {
            config,
            billing: Arc::new(billing),
            pool: Some(pool),
        }
    }

    /// State without a database pool
    pub fn without_database(config: Config, billing: BillingService) -> Self {
        Self {
            config,
            billing: Arc::new(billing),
            pool: None,
        }
    }
}
