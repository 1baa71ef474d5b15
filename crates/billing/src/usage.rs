//! Usage accounting
//!
//! Counts what a user currently consumes: properties owned, reports created in
//! the billing period, and photos per property. Usage is recomputed from the
//! record store on every call and never cached.
//!
//! The report window is the subscription's period while the subscription
//! still grants its plan and covers "now", otherwise the UTC calendar month.
//! Periods longer than a month (annual prices) are cut into monthly slices so
//! the report allowance stays monthly.
//!
//! Entitlement checks read usage and then decide; they do not reserve
//! capacity. Two concurrent creations can both observe one remaining slot and
//! both proceed, overshooting a limit by one. Strict enforcement needs an
//! atomic reservation at insert time (a compare-and-swap counter or a
//! constraint enforced by the record store).

use std::collections::HashMap;

use async_trait::async_trait;
use inspectra_shared::{PropertyId, SubscriptionStatus, UserId};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::BillingResult;
use crate::period::BillingPeriod;
use crate::store::Subscription;
use crate::subscriptions::SubscriptionStore;

/// Count queries against the inspection record store
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn count_properties(&self, user_id: UserId) -> BillingResult<u64>;

    async fn count_reports(&self, user_id: UserId, period: &BillingPeriod) -> BillingResult<u64>;

    /// Photo count for every property the user owns (properties without photos map to 0)
    async fn count_photos_by_property(
        &self,
        user_id: UserId,
    ) -> BillingResult<HashMap<PropertyId, u64>>;
}

/// Freshly computed consumption for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub user_id: UserId,
    pub period: BillingPeriod,
    pub properties_count: u64,
    pub reports_this_period_count: u64,
    pub photos_count_by_property: HashMap<PropertyId, u64>,
}

impl UsageSnapshot {
    pub fn photos_for(&self, property_id: PropertyId) -> u64 {
        self.photos_count_by_property
            .get(&property_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Window that reports are counted over at `now`
pub fn report_window(subscription: Option<&Subscription>, now: OffsetDateTime) -> BillingPeriod {
    match subscription {
        Some(sub)
            if matches!(
                sub.status,
                SubscriptionStatus::Active | SubscriptionStatus::PastDue | SubscriptionStatus::Canceled
            ) && sub.covers(now) =>
        {
            sub.period().monthly_slice(now)
        }
        _ => BillingPeriod::calendar_month(now),
    }
}

/// Computes usage snapshots on demand
#[derive(Clone)]
pub struct UsageAccountant {
    source: std::sync::Arc<dyn UsageSource>,
    subscriptions: SubscriptionStore,
}

impl UsageAccountant {
    pub fn new(source: std::sync::Arc<dyn UsageSource>, subscriptions: SubscriptionStore) -> Self {
        Self {
            source,
            subscriptions,
        }
    }

    /// Usage with reports counted over the user's current report window
    pub async fn snapshot(&self, user_id: UserId) -> BillingResult<UsageSnapshot> {
        self.snapshot_at(user_id, OffsetDateTime::now_utc()).await
    }

    pub async fn snapshot_at(&self, user_id: UserId, now: OffsetDateTime) -> BillingResult<UsageSnapshot> {
        let subscription = self.subscriptions.get_active(user_id).await?;
        self.snapshot_for_subscription(user_id, subscription.as_ref(), now)
            .await
    }

    /// `snapshot_at` for a subscription row the caller already loaded
    pub async fn snapshot_for_subscription(
        &self,
        user_id: UserId,
        subscription: Option<&Subscription>,
        now: OffsetDateTime,
    ) -> BillingResult<UsageSnapshot> {
        self.snapshot_for_period(user_id, report_window(subscription, now))
            .await
    }

    /// Usage with reports counted over an explicit period
    pub async fn snapshot_for_period(
        &self,
        user_id: UserId,
        period: BillingPeriod,
    ) -> BillingResult<UsageSnapshot> {
        let (properties_count, reports_this_period_count, photos_count_by_property) = tokio::try_join!(
            self.source.count_properties(user_id),
            self.source.count_reports(user_id, &period),
            self.source.count_photos_by_property(user_id),
        )?;

        tracing::debug!(
            user_id = %user_id,
            properties = properties_count,
            reports = reports_this_period_count,
            period_start = %period.start,
            "Usage snapshot computed"
        );

        Ok(UsageSnapshot {
            user_id,
            period,
            properties_count,
            reports_this_period_count,
            photos_count_by_property,
        })
    }
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// =============================================================================
// Postgres
// =============================================================================

/// Usage counts read from the `properties`, `reports` and `photos` tables
#[derive(Clone)]
pub struct PgUsageSource {
    pool: PgPool,
}

impl PgUsageSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageSource for PgUsageSource {
    async fn count_properties(&self, user_id: UserId) -> BillingResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM properties WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(to_count(count))
    }

    async fn count_reports(&self, user_id: UserId, period: &BillingPeriod) -> BillingResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM reports
            WHERE user_id = $1
              AND created_at >= $2
              AND created_at < $3
            "#,
        )
        .bind(user_id)
        .bind(period.start)
        .bind(period.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(to_count(count))
    }

    async fn count_photos_by_property(
        &self,
        user_id: UserId,
    ) -> BillingResult<HashMap<PropertyId, u64>> {
        let rows: Vec<(PropertyId, i64)> = sqlx::query_as(
            r#"
            SELECT p.id, COUNT(ph.id)
            FROM properties p
            LEFT JOIN photos ph ON ph.property_id = p.id
            WHERE p.user_id = $1
            GROUP BY p.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(property_id, count)| (property_id, to_count(count)))
            .collect())
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct InMemoryRecords {
    properties: HashMap<PropertyId, UserId>,
    reports: Vec<(UserId, PropertyId, OffsetDateTime)>,
    photos: HashMap<PropertyId, u64>,
}

/// In-memory record store (for development and tests without Postgres)
#[derive(Default)]
pub struct InMemoryUsageSource {
    records: RwLock<InMemoryRecords>,
}

impl InMemoryUsageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_property(&self, user_id: UserId) -> PropertyId {
        let property_id = PropertyId::new();
        self.records
            .write()
            .await
            .properties
            .insert(property_id, user_id);
        property_id
    }

    pub async fn add_report(&self, user_id: UserId, property_id: PropertyId, created_at: OffsetDateTime) {
        self.records
            .write()
            .await
            .reports
            .push((user_id, property_id, created_at));
    }

    pub async fn add_photos(&self, property_id: PropertyId, count: u64) {
        *self
            .records
            .write()
            .await
            .photos
            .entry(property_id)
            .or_insert(0) += count;
    }
}

#[async_trait]
impl UsageSource for InMemoryUsageSource {
    async fn count_properties(&self, user_id: UserId) -> BillingResult<u64> {
        let records = self.records.read().await;
        Ok(records.properties.values().filter(|owner| **owner == user_id).count() as u64)
    }

    async fn count_reports(&self, user_id: UserId, period: &BillingPeriod) -> BillingResult<u64> {
        let records = self.records.read().await;
        Ok(records
            .reports
            .iter()
            .filter(|(owner, _, created_at)| *owner == user_id && period.contains(*created_at))
            .count() as u64)
    }

    async fn count_photos_by_property(
        &self,
        user_id: UserId,
    ) -> BillingResult<HashMap<PropertyId, u64>> {
        let records = self.records.read().await;
        Ok(records
            .properties
            .iter()
            .filter(|(_, owner)| **owner == user_id)
            .map(|(property_id, _)| {
                (
                    *property_id,
                    records.photos.get(property_id).copied().unwrap_or(0),
                )
            })
            .collect())
    }
}
