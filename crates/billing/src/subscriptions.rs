//! Subscription state store
//!
//! Idempotent read / upsert / status-update operations over the subscription
//! repository. Updates addressed to an external subscription id with no
//! stored row are logged and treated as no-ops, and `canceled` is terminal.
//! A checkout for an external id already stored never rewrites the row.

use std::sync::Arc;

use inspectra_shared::{SubscriptionStatus, UserId};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::period::BillingPeriod;
use crate::store::{CheckoutSubscription, RowWrite, StatusChange, Subscription, SubscriptionRepository};

/// What a mutation did to the stored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was written
    Applied(Subscription),
    /// The row already reflected the request; nothing was written
    Unchanged(Subscription),
    /// No row matched; nothing was written
    NotFound,
    /// The transition is not allowed from the stored status; nothing was written
    Rejected {
        current: SubscriptionStatus,
        requested: SubscriptionStatus,
    },
}

impl UpdateOutcome {
    pub fn subscription(&self) -> Option<&Subscription> {
        match self {
            UpdateOutcome::Applied(s) | UpdateOutcome::Unchanged(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

fn validate_period(period_start: OffsetDateTime, period_end: OffsetDateTime) -> BillingResult<()> {
    if period_end <= period_start {
        return Err(BillingError::InvalidInput(format!(
            "period_end ({}) must be after period_start ({})",
            period_end, period_start
        )));
    }
    Ok(())
}

/// Subscription state store service
#[derive(Clone)]
pub struct SubscriptionStore {
    repo: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionStore {
    pub fn new(repo: Arc<dyn SubscriptionRepository>) -> Self {
        Self { repo }
    }

    /// The user's subscription row, whatever its status
    pub async fn get_active(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        self.repo.find_by_user(user_id).await
    }

    pub async fn get_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.repo.find_by_external_id(external_subscription_id).await
    }

    /// Insert or replace the user's row after a completed checkout
    pub async fn upsert_on_checkout(
        &self,
        checkout: CheckoutSubscription,
    ) -> BillingResult<UpdateOutcome> {
        validate_period(checkout.period_start, checkout.period_end)?;

        match self.repo.upsert(&checkout).await? {
            RowWrite::Written(row) => {
                tracing::info!(
                    user_id = %row.user_id,
                    plan_id = %row.plan_id,
                    external_subscription_id = %row.external_subscription_id,
                    period_end = %row.period_end,
                    "Subscription upserted from checkout"
                );
                Ok(UpdateOutcome::Applied(row))
            }
            RowWrite::Kept(row) => {
                tracing::debug!(
                    user_id = %checkout.user_id,
                    external_subscription_id = %checkout.external_subscription_id,
                    status = %row.status,
                    "Checkout already applied"
                );
                Ok(UpdateOutcome::Unchanged(row))
            }
            RowWrite::Blocked(row) => {
                tracing::warn!(
                    user_id = %checkout.user_id,
                    external_subscription_id = %checkout.external_subscription_id,
                    "Checkout redelivered for a canceled subscription - ignoring"
                );
                Ok(UpdateOutcome::Rejected {
                    current: row.status,
                    requested: SubscriptionStatus::Active,
                })
            }
            RowWrite::Missing => Err(BillingError::Internal(format!(
                "No row written for user {} on checkout",
                checkout.user_id
            ))),
        }
    }

    /// Set status and period bounds for an external subscription
    pub async fn update_status(
        &self,
        external_subscription_id: &str,
        status: SubscriptionStatus,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> BillingResult<UpdateOutcome> {
        validate_period(period_start, period_end)?;

        self.transition(
            external_subscription_id,
            StatusChange {
                status,
                period: Some(BillingPeriod::new(period_start, period_end)),
            },
        )
        .await
    }

    /// Mark an external subscription canceled, keeping plan and period
    pub async fn mark_canceled(&self, external_subscription_id: &str) -> BillingResult<UpdateOutcome> {
        self.transition(
            external_subscription_id,
            StatusChange {
                status: SubscriptionStatus::Canceled,
                period: None,
            },
        )
        .await
    }

    /// Mark an external subscription past due, keeping plan and period
    pub async fn mark_past_due(&self, external_subscription_id: &str) -> BillingResult<UpdateOutcome> {
        self.transition(
            external_subscription_id,
            StatusChange {
                status: SubscriptionStatus::PastDue,
                period: None,
            },
        )
        .await
    }

    async fn transition(
        &self,
        external_subscription_id: &str,
        change: StatusChange,
    ) -> BillingResult<UpdateOutcome> {
        match self.repo.apply_change(external_subscription_id, &change).await? {
            RowWrite::Written(row) => {
                tracing::info!(
                    external_subscription_id = %external_subscription_id,
                    user_id = %row.user_id,
                    status = %row.status,
                    "Subscription status updated"
                );
                Ok(UpdateOutcome::Applied(row))
            }
            RowWrite::Kept(row) => Ok(UpdateOutcome::Unchanged(row)),
            RowWrite::Blocked(row) => {
                tracing::warn!(
                    external_subscription_id = %external_subscription_id,
                    user_id = %row.user_id,
                    current = %row.status,
                    requested = %change.status,
                    "Rejected status transition out of terminal state"
                );
                Ok(UpdateOutcome::Rejected {
                    current: row.status,
                    requested: change.status,
                })
            }
            RowWrite::Missing => {
                tracing::warn!(
                    external_subscription_id = %external_subscription_id,
                    "No subscription for external id - update is a no-op"
                );
                Ok(UpdateOutcome::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySubscriptionRepository;
    use time::macros::datetime;

    fn setup() -> (SubscriptionStore, Arc<InMemorySubscriptionRepository>) {
        let repo = Arc::new(InMemorySubscriptionRepository::new());
        (SubscriptionStore::new(repo.clone()), repo)
    }

    fn pro_checkout(user_id: UserId) -> CheckoutSubscription {
        CheckoutSubscription {
            user_id,
            plan_id: "pro".to_string(),
            period_start: datetime!(2024-05-10 12:00 UTC),
            period_end: datetime!(2024-06-10 12:00 UTC),
            external_subscription_id: "sub_pro_1".to_string(),
            external_customer_id: Some("cus_1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_checkout_twice_yields_identical_row() {
        let (store, repo) = setup();
        let user = UserId::new();

        let first = store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        let second = store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        assert!(first.is_applied());
        assert!(matches!(second, UpdateOutcome::Unchanged(_)));
        assert_eq!(first.subscription(), second.subscription());
        assert_eq!(repo.all().await, vec![first.subscription().unwrap().clone()]);
    }

    #[tokio::test]
    async fn test_checkout_rejects_inverted_period() {
        let (store, repo) = setup();
        let mut checkout = pro_checkout(UserId::new());
        checkout.period_end = checkout.period_start;

        let err = store.upsert_on_checkout(checkout).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_status_unknown_external_id_is_noop() {
        let (store, repo) = setup();

        let outcome = store
            .update_status(
                "sub_nobody",
                SubscriptionStatus::Active,
                datetime!(2024-05-01 00:00 UTC),
                datetime!(2024-06-01 00:00 UTC),
            )
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::NotFound);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_status_sets_period() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        let outcome = store
            .update_status(
                "sub_pro_1",
                SubscriptionStatus::Active,
                datetime!(2024-06-10 12:00 UTC),
                datetime!(2024-07-10 12:00 UTC),
            )
            .await
            .unwrap();

        let row = outcome.subscription().unwrap();
        assert!(outcome.is_applied());
        assert_eq!(row.period_start, datetime!(2024-06-10 12:00 UTC));
        assert_eq!(row.period_end, datetime!(2024-07-10 12:00 UTC));
    }

    #[tokio::test]
    async fn test_mark_canceled_keeps_plan_and_period() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        let outcome = store.mark_canceled("sub_pro_1").await.unwrap();
        let row = outcome.subscription().unwrap();

        assert_eq!(row.status, SubscriptionStatus::Canceled);
        assert_eq!(row.plan_id, "pro");
        assert_eq!(row.period_start, datetime!(2024-05-10 12:00 UTC));
        assert_eq!(row.period_end, datetime!(2024-06-10 12:00 UTC));

        // Redelivery changes nothing
        let again = store.mark_canceled("sub_pro_1").await.unwrap();
        assert!(matches!(again, UpdateOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn test_past_due_round_trip() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        store.mark_past_due("sub_pro_1").await.unwrap();
        assert_eq!(
            store.get_active(user).await.unwrap().unwrap().status,
            SubscriptionStatus::PastDue
        );

        store
            .update_status(
                "sub_pro_1",
                SubscriptionStatus::Active,
                datetime!(2024-05-10 12:00 UTC),
                datetime!(2024-06-10 12:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_active(user).await.unwrap().unwrap().status,
            SubscriptionStatus::Active
        );
    }

    #[tokio::test]
    async fn test_canceled_is_terminal() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        store.mark_canceled("sub_pro_1").await.unwrap();

        let late_update = store
            .update_status(
                "sub_pro_1",
                SubscriptionStatus::Active,
                datetime!(2024-05-10 12:00 UTC),
                datetime!(2024-06-10 12:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(
            late_update,
            UpdateOutcome::Rejected {
                current: SubscriptionStatus::Canceled,
                requested: SubscriptionStatus::Active,
            }
        );

        let late_failure = store.mark_past_due("sub_pro_1").await.unwrap();
        assert!(matches!(late_failure, UpdateOutcome::Rejected { .. }));

        let redelivered_checkout = store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        assert!(matches!(redelivered_checkout, UpdateOutcome::Rejected { .. }));

        assert_eq!(
            store.get_active(user).await.unwrap().unwrap().status,
            SubscriptionStatus::Canceled
        );
    }

    #[tokio::test]
    async fn test_checkout_redelivered_after_payment_failure_keeps_past_due() {
        let (store, repo) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        store.mark_past_due("sub_pro_1").await.unwrap();
        let before = repo.all().await;

        let outcome = store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        assert!(matches!(outcome, UpdateOutcome::Unchanged(_)));
        assert_eq!(
            outcome.subscription().unwrap().status,
            SubscriptionStatus::PastDue
        );
        assert_eq!(repo.all().await, before);
    }

    #[tokio::test]
    async fn test_checkout_redelivered_after_update_keeps_provider_period() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        store
            .update_status(
                "sub_pro_1",
                SubscriptionStatus::Active,
                datetime!(2024-05-10 11:59 UTC),
                datetime!(2024-06-10 11:59 UTC),
            )
            .await
            .unwrap();

        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();

        let row = store.get_active(user).await.unwrap().unwrap();
        assert_eq!(row.period_start, datetime!(2024-05-10 11:59 UTC));
        assert_eq!(row.period_end, datetime!(2024-06-10 11:59 UTC));
    }

    #[tokio::test]
    async fn test_checkout_with_another_users_subscription_is_a_conflict() {
        let (store, repo) = setup();
        store.upsert_on_checkout(pro_checkout(UserId::new())).await.unwrap();

        let err = store
            .upsert_on_checkout(pro_checkout(UserId::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Conflict(_)));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_resubscribe_after_cancel_replaces_row() {
        let (store, _) = setup();
        let user = UserId::new();
        store.upsert_on_checkout(pro_checkout(user)).await.unwrap();
        store.mark_canceled("sub_pro_1").await.unwrap();

        let mut renewed = pro_checkout(user);
        renewed.external_subscription_id = "sub_pro_2".to_string();
        renewed.period_start = datetime!(2024-08-01 00:00 UTC);
        renewed.period_end = datetime!(2024-09-01 00:00 UTC);

        let outcome = store.upsert_on_checkout(renewed).await.unwrap();
        let row = outcome.subscription().unwrap();
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.external_subscription_id, "sub_pro_2");
        assert!(store.get_by_external_id("sub_pro_1").await.unwrap().is_none());
    }
}
