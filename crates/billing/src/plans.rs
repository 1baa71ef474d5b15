//! Plan catalog
//!
//! The compiled registry of plans and the limitations each one grants.
//! Plans are never persisted; a subscription row only stores the plan id.

use inspectra_shared::{Limit, SupportLevel};
use serde::Serialize;

use crate::error::{BillingError, BillingResult};

pub const FREE_PLAN_ID: &str = "free";
pub const PRO_PLAN_ID: &str = "pro";
pub const BUSINESS_PLAN_ID: &str = "business";

/// Limits and feature flags granted by a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Limitations {
    pub max_properties: Limit,
    pub max_reports_per_period: Limit,
    pub max_photos_per_property: Limit,
    pub support_level: SupportLevel,
    pub team_management: bool,
}

/// A named bundle of limits and a monthly price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Monthly price in cents
    pub price_cents: u32,
    pub limitations: Limitations,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

/// Immutable plan registry
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
    default_index: usize,
}

impl PlanCatalog {
    /// Build a catalog from a plan list
    ///
    /// Fails when plan ids collide or `default_plan_id` is not in the list.
    pub fn new(plans: Vec<Plan>, default_plan_id: &str) -> BillingResult<Self> {
        for (i, plan) in plans.iter().enumerate() {
            if plans[..i].iter().any(|p| p.id == plan.id) {
                return Err(BillingError::Config(format!(
                    "Duplicate plan id in catalog: {}",
                    plan.id
                )));
            }
        }

        let default_index = plans
            .iter()
            .position(|p| p.id == default_plan_id)
            .ok_or_else(|| {
                BillingError::Config(format!("Default plan {} not in catalog", default_plan_id))
            })?;

        Ok(Self {
            plans,
            default_index,
        })
    }

    /// The compiled Free → Pro → Business catalog
    pub fn builtin() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: FREE_PLAN_ID.to_string(),
                    name: "Free".to_string(),
                    price_cents: 0,
                    limitations: Limitations {
                        max_properties: Limit::Limited(1),
                        max_reports_per_period: Limit::Limited(1),
                        max_photos_per_property: Limit::Limited(20),
                        support_level: SupportLevel::Community,
                        team_management: false,
                    },
                },
                Plan {
                    id: PRO_PLAN_ID.to_string(),
                    name: "Pro".to_string(),
                    price_cents: 1_900,
                    limitations: Limitations {
                        max_properties: Limit::Limited(25),
                        max_reports_per_period: Limit::Limited(50),
                        max_photos_per_property: Limit::Limited(200),
                        support_level: SupportLevel::Email,
                        team_management: false,
                    },
                },
                Plan {
                    id: BUSINESS_PLAN_ID.to_string(),
                    name: "Business".to_string(),
                    price_cents: 4_900,
                    limitations: Limitations {
                        max_properties: Limit::Unbounded,
                        max_reports_per_period: Limit::Unbounded,
                        max_photos_per_property: Limit::Unbounded,
                        support_level: SupportLevel::Priority,
                        team_management: true,
                    },
                },
            ],
            default_index: 0,
        }
    }

    /// Look up a plan by id
    pub fn resolve(&self, plan_id: &str) -> BillingResult<&Plan> {
        self.plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| BillingError::UnknownPlan(plan_id.to_string()))
    }

    /// Plan assigned to users without a subscription
    pub fn default_plan(&self) -> &Plan {
        &self.plans[self.default_index]
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
