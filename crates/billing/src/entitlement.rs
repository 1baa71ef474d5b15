//! Entitlement Module
//!
//! Answers "may this user do this now, and how much capacity is left?" by
//! combining the plan catalog, the user's subscription row, and a fresh usage
//! snapshot.
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: `evaluate()` is a pure function of plan, usage, feature and delta
//! 2. **Side-effect free**: checks may run speculatively (e.g. to render capacity UI)
//! 3. **Fails closed**: if the plan or usage cannot be resolved the answer is Deny
//! 4. **Designed default**: users without a subscription row get the default plan

use std::sync::Arc;

use inspectra_shared::{Limit, PropertyId, SubscriptionStatus, SupportLevel, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::period::BillingPeriod;
use crate::plans::{Plan, PlanCatalog};
use crate::store::Subscription;
use crate::subscriptions::SubscriptionStore;
use crate::usage::{UsageAccountant, UsageSnapshot};

/// A gated user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum Feature {
    CreateProperty,
    CreateReport,
    AddPhotos { property_id: PropertyId },
    TeamManagement,
}

impl Feature {
    /// Build a feature from its wire name; `add_photos` needs the property
    pub fn from_name(name: &str, property_id: Option<PropertyId>) -> BillingResult<Self> {
        match name {
            "create_property" => Ok(Feature::CreateProperty),
            "create_report" => Ok(Feature::CreateReport),
            "team_management" => Ok(Feature::TeamManagement),
            "add_photos" => property_id
                .map(|property_id| Feature::AddPhotos { property_id })
                .ok_or_else(|| {
                    BillingError::InvalidInput("add_photos requires propertyId".to_string())
                }),
            other => Err(BillingError::InvalidInput(format!("Unknown feature: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Feature::CreateProperty => "create_property",
            Feature::CreateReport => "create_report",
            Feature::AddPhotos { .. } => "add_photos",
            Feature::TeamManagement => "team_management",
        }
    }

    fn needs_usage(&self) -> bool {
        !matches!(self, Feature::TeamManagement)
    }
}

/// How the user's plan was arrived at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    /// No subscription row; default plan
    Free,
    /// Subscription active and in good standing
    Active,
    /// Payment failed; plan kept while the provider retries
    PastDueGrace,
    /// Subscription canceled but still inside the paid period
    CanceledGrace,
    /// Subscription canceled and the paid period has elapsed; default plan
    Expired,
    /// Checkout never completed payment; default plan
    Incomplete,
}

impl std::fmt::Display for EntitlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitlementState::Free => write!(f, "free"),
            EntitlementState::Active => write!(f, "active"),
            EntitlementState::PastDueGrace => write!(f, "past_due_grace"),
            EntitlementState::CanceledGrace => write!(f, "canceled_grace"),
            EntitlementState::Expired => write!(f, "expired"),
            EntitlementState::Incomplete => write!(f, "incomplete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The request would exceed the plan limit
    LimitReached,
    /// The plan does not include this feature at all
    NotIncludedInPlan,
    /// The subscription or its plan could not be resolved
    PlanUnavailable,
    /// Usage could not be computed
    UsageUnavailable,
}

/// Result of an entitlement check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// `remaining` is the capacity before the request, `None` when unbounded
    Allow { remaining: Option<u64> },
    Deny {
        reason: DenyReason,
        limit: Option<u64>,
        remaining: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    fn fail_closed(reason: DenyReason) -> Self {
        Decision::Deny {
            reason,
            limit: None,
            remaining: 0,
        }
    }
}

/// Remaining capacity for a limit given current usage: `max(0, limit - used)`
pub fn remaining(limit: Limit, used: u64) -> Option<u64> {
    limit.remaining(used)
}

/// Pure decision for `requested` more units of `feature`
pub fn evaluate(plan: &Plan, usage: &UsageSnapshot, feature: Feature, requested: u64) -> Decision {
    let limits = &plan.limitations;

    let (limit, used) = match feature {
        Feature::CreateProperty => (limits.max_properties, usage.properties_count),
        Feature::CreateReport => (limits.max_reports_per_period, usage.reports_this_period_count),
        Feature::AddPhotos { property_id } => {
            (limits.max_photos_per_property, usage.photos_for(property_id))
        }
        Feature::TeamManagement => return evaluate_flag(limits.team_management),
    };

    if limit.allows(used, requested) {
        Decision::Allow {
            remaining: limit.remaining(used),
        }
    } else {
        Decision::Deny {
            reason: DenyReason::LimitReached,
            limit: limit.value(),
            remaining: limit.remaining(used).unwrap_or(0),
        }
    }
}

fn evaluate_flag(included: bool) -> Decision {
    if included {
        Decision::Allow { remaining: None }
    } else {
        Decision::Deny {
            reason: DenyReason::NotIncludedInPlan,
            limit: Some(0),
            remaining: 0,
        }
    }
}

/// Resolve the plan that applies to a (possibly absent) subscription at `now`
pub fn resolve_plan<'a>(
    catalog: &'a PlanCatalog,
    subscription: Option<&Subscription>,
    now: OffsetDateTime,
) -> BillingResult<(&'a Plan, EntitlementState)> {
    let Some(sub) = subscription else {
        return Ok((catalog.default_plan(), EntitlementState::Free));
    };

    match sub.status {
        SubscriptionStatus::Active => Ok((catalog.resolve(&sub.plan_id)?, EntitlementState::Active)),
        SubscriptionStatus::PastDue => {
            Ok((catalog.resolve(&sub.plan_id)?, EntitlementState::PastDueGrace))
        }
        SubscriptionStatus::Canceled if now < sub.period_end => {
            Ok((catalog.resolve(&sub.plan_id)?, EntitlementState::CanceledGrace))
        }
        SubscriptionStatus::Canceled => Ok((catalog.default_plan(), EntitlementState::Expired)),
        SubscriptionStatus::Incomplete => {
            Ok((catalog.default_plan(), EntitlementState::Incomplete))
        }
    }
}

/// Used / limit / remaining for one usage dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub used: u64,
    pub limit: Limit,
    pub remaining: Option<u64>,
}

impl Capacity {
    fn new(limit: Limit, used: u64) -> Self {
        Self {
            used,
            limit,
            remaining: limit.remaining(used),
        }
    }
}

/// Everything the UI needs to render plan capacity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementSummary {
    pub user_id: UserId,
    pub plan_id: String,
    pub plan_name: String,
    pub state: EntitlementState,
    pub period: BillingPeriod,
    pub properties: Capacity,
    pub reports_this_period: Capacity,
    pub max_photos_per_property: Limit,
    pub support_level: SupportLevel,
    pub team_management: bool,
}

/// Entitlement guard for gating user actions
#[derive(Clone)]
pub struct EntitlementGuard {
    catalog: Arc<PlanCatalog>,
    subscriptions: SubscriptionStore,
    usage: UsageAccountant,
}

impl EntitlementGuard {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        subscriptions: SubscriptionStore,
        usage: UsageAccountant,
    ) -> Self {
        Self {
            catalog,
            subscriptions,
            usage,
        }
    }

    /// May `user_id` consume `requested` more units of `feature` right now?
    pub async fn check(&self, user_id: UserId, feature: Feature, requested: u64) -> Decision {
        self.check_at(user_id, feature, requested, OffsetDateTime::now_utc())
            .await
    }

    /// `check` evaluated as of `now`
    pub async fn check_at(
        &self,
        user_id: UserId,
        feature: Feature,
        requested: u64,
        now: OffsetDateTime,
    ) -> Decision {
        let subscription = match self.subscriptions.get_active(user_id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load subscription - denying");
                return Decision::fail_closed(DenyReason::PlanUnavailable);
            }
        };

        let (plan, state) = match resolve_plan(&self.catalog, subscription.as_ref(), now) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to resolve plan - denying");
                return Decision::fail_closed(DenyReason::PlanUnavailable);
            }
        };

        if !feature.needs_usage() {
            return evaluate_flag(plan.limitations.team_management);
        }

        let usage = match self
            .usage
            .snapshot_for_subscription(user_id, subscription.as_ref(), now)
            .await
        {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to compute usage - denying");
                return Decision::fail_closed(DenyReason::UsageUnavailable);
            }
        };

        let decision = evaluate(plan, &usage, feature, requested);

        tracing::debug!(
            user_id = %user_id,
            plan_id = %plan.id,
            state = %state,
            feature = ?feature,
            requested = requested,
            allowed = decision.is_allowed(),
            "Entitlement checked"
        );

        decision
    }

    pub async fn can_create_property(&self, user_id: UserId) -> bool {
        self.check(user_id, Feature::CreateProperty, 1).await.is_allowed()
    }

    pub async fn can_create_report(&self, user_id: UserId) -> bool {
        self.check(user_id, Feature::CreateReport, 1).await.is_allowed()
    }

    pub async fn can_add_photos(&self, user_id: UserId, property_id: PropertyId, count: u64) -> bool {
        self.check(user_id, Feature::AddPhotos { property_id }, count)
            .await
            .is_allowed()
    }

    /// Plan, state and remaining capacity for every dimension
    pub async fn summary(&self, user_id: UserId) -> BillingResult<EntitlementSummary> {
        self.summary_at(user_id, OffsetDateTime::now_utc()).await
    }

    pub async fn summary_at(
        &self,
        user_id: UserId,
        now: OffsetDateTime,
    ) -> BillingResult<EntitlementSummary> {
        let subscription = self.subscriptions.get_active(user_id).await?;
        let (plan, state) = resolve_plan(&self.catalog, subscription.as_ref(), now)?;
        let usage = self
            .usage
            .snapshot_for_subscription(user_id, subscription.as_ref(), now)
            .await?;
        let limits = &plan.limitations;

        Ok(EntitlementSummary {
            user_id,
            plan_id: plan.id.clone(),
            plan_name: plan.name.clone(),
            state,
            period: usage.period,
            properties: Capacity::new(limits.max_properties, usage.properties_count),
            reports_this_period: Capacity::new(
                limits.max_reports_per_period,
                usage.reports_this_period_count,
            ),
            max_photos_per_property: limits.max_photos_per_property,
            support_level: limits.support_level,
            team_management: limits.team_management,
        })
    }
}
