//! Subscription persistence
//!
//! The `subscriptions` table holds at most one row per user, keyed by
//! `user_id` and secondarily unique on `external_subscription_id`. Rows are
//! never deleted. All coordination between concurrent writers is delegated to
//! the per-key atomicity of the backing store: every guard (same external id
//! already stored, canceled is terminal) is evaluated inside the write itself.

use std::collections::HashMap;

use async_trait::async_trait;
use inspectra_shared::{SubscriptionStatus, UserId};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::period::BillingPeriod;

/// Persisted subscription record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Whether `now` falls inside the paid period
    pub fn covers(&self, now: OffsetDateTime) -> bool {
        self.period_start <= now && now < self.period_end
    }

    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::new(self.period_start, self.period_end)
    }
}

/// The row content written by a completed checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSubscription {
    pub user_id: UserId,
    pub plan_id: String,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub external_subscription_id: String,
    pub external_customer_id: Option<String>,
}

/// A status / period change addressed by external subscription id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: SubscriptionStatus,
    /// New period bounds; `None` keeps the stored ones
    pub period: Option<BillingPeriod>,
}

/// What a repository write did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowWrite {
    /// The row was inserted or changed
    Written(Subscription),
    /// Nothing to write: the row already reflects the request
    Kept(Subscription),
    /// The stored status does not allow the change; nothing was written
    Blocked(Subscription),
    /// No row for the key
    Missing,
}

fn external_id_taken(external_subscription_id: &str) -> BillingError {
    BillingError::Conflict(format!(
        "external subscription {} belongs to another user",
        external_subscription_id
    ))
}

/// Key lookups and upserts against the subscription table
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user(&self, user_id: UserId) -> BillingResult<Option<Subscription>>;

    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// Insert or replace the row for `new.user_id` with an active subscription.
    ///
    /// A stored row that already carries `new.external_subscription_id` is
    /// never rewritten, whatever its status: `Kept`, or `Blocked` when it is
    /// canceled. An external id owned by another user is a `Conflict`.
    async fn upsert(&self, new: &CheckoutSubscription) -> BillingResult<RowWrite>;

    /// Apply `change` to the row with this external id.
    ///
    /// A canceled row only accepts `canceled`; anything else is `Blocked`.
    async fn apply_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> BillingResult<RowWrite>;
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres-backed subscription repository
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, period_start, period_end, \
     external_subscription_id, external_customer_id, created_at, updated_at";

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn find_by_user(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {} FROM subscriptions WHERE external_subscription_id = $1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, new: &CheckoutSubscription) -> BillingResult<RowWrite> {
        // The WHERE clause leaves a row that already carries this external id
        // alone, so a late redelivery cannot undo later status changes.
        let written = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, status, period_start, period_end,
                external_subscription_id, external_customer_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id) DO UPDATE SET
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                period_start = EXCLUDED.period_start,
                period_end = EXCLUDED.period_end,
                external_subscription_id = EXCLUDED.external_subscription_id,
                external_customer_id = EXCLUDED.external_customer_id,
                updated_at = NOW()
            WHERE subscriptions.external_subscription_id <> EXCLUDED.external_subscription_id
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.plan_id)
        .bind(SubscriptionStatus::Active)
        .bind(new.period_start)
        .bind(new.period_end)
        .bind(&new.external_subscription_id)
        .bind(&new.external_customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                external_id_taken(&new.external_subscription_id)
            }
            other => other.into(),
        })?;

        if let Some(row) = written {
            return Ok(RowWrite::Written(row));
        }

        match self.find_by_user(new.user_id).await? {
            Some(row) if row.status.is_terminal() => Ok(RowWrite::Blocked(row)),
            Some(row) => Ok(RowWrite::Kept(row)),
            None => Err(BillingError::Internal(format!(
                "Subscription for user {} vanished during upsert",
                new.user_id
            ))),
        }
    }

    async fn apply_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> BillingResult<RowWrite> {
        let written = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = $2,
                period_start = COALESCE($3, period_start),
                period_end = COALESCE($4, period_end),
                updated_at = NOW()
            WHERE external_subscription_id = $1
              AND (status <> 'canceled' OR $5)
              AND (status, period_start, period_end) IS DISTINCT FROM
                  ($2, COALESCE($3, period_start), COALESCE($4, period_end))
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(external_subscription_id)
        .bind(change.status)
        .bind(change.period.map(|p| p.start))
        .bind(change.period.map(|p| p.end))
        .bind(change.status == SubscriptionStatus::Canceled)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = written {
            return Ok(RowWrite::Written(row));
        }

        // Nothing matched: report why
        Ok(match self.find_by_external_id(external_subscription_id).await? {
            None => RowWrite::Missing,
            Some(row) if !row.status.can_transition_to(change.status) => RowWrite::Blocked(row),
            Some(row) => RowWrite::Kept(row),
        })
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// In-memory subscription repository (for development and tests without Postgres)
///
/// Enforces the same uniqueness rules as the table: one row per user and one
/// row per external subscription id.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: RwLock<HashMap<UserId, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing checkout semantics
    pub async fn insert(&self, subscription: Subscription) {
        self.rows
            .write()
            .await
            .insert(subscription.user_id, subscription);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<Subscription> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_by_user(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        Ok(self.rows.read().await.get(&user_id).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.external_subscription_id == external_subscription_id)
            .cloned())
    }

    async fn upsert(&self, new: &CheckoutSubscription) -> BillingResult<RowWrite> {
        let mut rows = self.rows.write().await;

        let conflict = rows.values().any(|s| {
            s.user_id != new.user_id && s.external_subscription_id == new.external_subscription_id
        });
        if conflict {
            return Err(external_id_taken(&new.external_subscription_id));
        }

        let now = OffsetDateTime::now_utc();
        let row = match rows.get(&new.user_id) {
            Some(existing) if existing.external_subscription_id == new.external_subscription_id => {
                return Ok(if existing.status.is_terminal() {
                    RowWrite::Blocked(existing.clone())
                } else {
                    RowWrite::Kept(existing.clone())
                });
            }
            Some(existing) => Subscription {
                id: existing.id,
                user_id: new.user_id,
                plan_id: new.plan_id.clone(),
                status: SubscriptionStatus::Active,
                period_start: new.period_start,
                period_end: new.period_end,
                external_subscription_id: new.external_subscription_id.clone(),
                external_customer_id: new.external_customer_id.clone(),
                created_at: existing.created_at,
                updated_at: now,
            },
            None => Subscription {
                id: Uuid::new_v4(),
                user_id: new.user_id,
                plan_id: new.plan_id.clone(),
                status: SubscriptionStatus::Active,
                period_start: new.period_start,
                period_end: new.period_end,
                external_subscription_id: new.external_subscription_id.clone(),
                external_customer_id: new.external_customer_id.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        rows.insert(new.user_id, row.clone());
        Ok(RowWrite::Written(row))
    }

    async fn apply_change(
        &self,
        external_subscription_id: &str,
        change: &StatusChange,
    ) -> BillingResult<RowWrite> {
        let mut rows = self.rows.write().await;

        let Some(row) = rows
            .values_mut()
            .find(|s| s.external_subscription_id == external_subscription_id)
        else {
            return Ok(RowWrite::Missing);
        };

        if !row.status.can_transition_to(change.status) {
            return Ok(RowWrite::Blocked(row.clone()));
        }

        let period = change.period.unwrap_or_else(|| row.period());
        if row.status == change.status && row.period() == period {
            return Ok(RowWrite::Kept(row.clone()));
        }

        row.status = change.status;
        row.period_start = period.start;
        row.period_end = period.end;
        row.updated_at = OffsetDateTime::now_utc();

        Ok(RowWrite::Written(row.clone()))
    }
}
