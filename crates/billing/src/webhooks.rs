//! Webhook handling
//!
//! Authenticates provider deliveries, parses them into [`WebhookEvent`]s and
//! applies their effect to the subscription store. Every effect is an
//! idempotent upsert or status update, so redelivery of any event converges
//! on the same stored row.

use std::sync::Arc;

use inspectra_shared::UserId;
use time::OffsetDateTime;

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{
    self, CheckoutSessionCompleted, InvoicePayment, ParsedEvent, SubscriptionUpdated, WebhookEvent,
};
use crate::period::add_one_month;
use crate::plans::PlanCatalog;
use crate::signature::SignatureVerifier;
use crate::store::CheckoutSubscription;
use crate::subscriptions::{SubscriptionStore, UpdateOutcome};

/// What handling a delivery did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The event was dispatched to the subscription store
    Handled {
        event_id: String,
        event_type: String,
        update: UpdateOutcome,
    },
    /// Recognised event with nothing to change
    NoOp {
        event_id: String,
        event_type: String,
        reason: &'static str,
    },
    /// Event type we do not handle; acknowledged
    Ignored { event_id: String, event_type: String },
}

impl WebhookOutcome {
    pub fn event_type(&self) -> &str {
        match self {
            WebhookOutcome::Handled { event_type, .. }
            | WebhookOutcome::NoOp { event_type, .. }
            | WebhookOutcome::Ignored { event_type, .. } => event_type,
        }
    }
}

/// Webhook handler for provider events
#[derive(Clone)]
pub struct WebhookHandler {
    store: SubscriptionStore,
    catalog: Arc<PlanCatalog>,
    config: StripeConfig,
    verifier: SignatureVerifier,
}

impl WebhookHandler {
    pub fn new(store: SubscriptionStore, catalog: Arc<PlanCatalog>, config: StripeConfig) -> Self {
        let verifier = SignatureVerifier::new(config.webhook_secret.clone());
        Self {
            store,
            catalog,
            config,
            verifier,
        }
    }

    /// Verify, parse and apply a raw delivery
    pub async fn handle(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookOutcome> {
        self.handle_at(payload, signature, OffsetDateTime::now_utc())
            .await
    }

    /// `handle` with an explicit clock for the signature tolerance check
    pub async fn handle_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        self.verifier.verify_at(payload, signature, now)?;

        let parsed = events::parse_event(payload).map_err(|e| {
            tracing::warn!(error = %e, "Rejected malformed webhook payload");
            e
        })?;

        tracing::info!(
            event_id = %parsed.id,
            event_type = %parsed.event_type,
            "Processing webhook event"
        );

        let outcome = self.dispatch(parsed).await?;

        tracing::debug!(outcome = ?outcome, "Webhook event processed");
        Ok(outcome)
    }

    async fn dispatch(&self, parsed: ParsedEvent) -> BillingResult<WebhookOutcome> {
        let ParsedEvent {
            id: event_id,
            event_type,
            event,
            ..
        } = parsed;

        let update = match event {
            WebhookEvent::CheckoutSessionCompleted(session) => {
                match self.handle_checkout_completed(&session).await? {
                    Ok(update) => update,
                    Err(reason) => {
                        return Ok(WebhookOutcome::NoOp {
                            event_id,
                            event_type,
                            reason,
                        })
                    }
                }
            }
            WebhookEvent::SubscriptionUpdated(update) => {
                self.handle_subscription_updated(&update).await?
            }
            WebhookEvent::SubscriptionDeleted(deleted) => {
                self.store.mark_canceled(&deleted.id).await?
            }
            WebhookEvent::InvoicePaymentFailed(invoice) => {
                let Some(subscription_id) = invoice.subscription.as_deref() else {
                    return Ok(no_subscription(event_id, event_type, &invoice));
                };
                self.store.mark_past_due(subscription_id).await?
            }
            WebhookEvent::InvoicePaymentSucceeded(invoice) => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    subscription_id = ?invoice.subscription,
                    "Invoice paid"
                );
                return Ok(WebhookOutcome::NoOp {
                    event_id,
                    event_type,
                    reason: "payment success carries no state change",
                });
            }
            WebhookEvent::Unknown => {
                tracing::debug!(event_type = %event_type, "Ignoring unhandled webhook event type");
                return Ok(WebhookOutcome::Ignored {
                    event_id,
                    event_type,
                });
            }
        };

        Ok(WebhookOutcome::Handled {
            event_id,
            event_type,
            update,
        })
    }

    /// The inner `Err` is the reason the checkout is acknowledged without a write
    async fn handle_checkout_completed(
        &self,
        session: &CheckoutSessionCompleted,
    ) -> BillingResult<Result<UpdateOutcome, &'static str>> {
        const NO_REFERENCE: &str = "checkout has no user or subscription reference";

        let Some(reference) = session.client_reference_id.as_deref() else {
            tracing::warn!(session_id = %session.id, "Checkout completed without client_reference_id");
            return Ok(Err(NO_REFERENCE));
        };
        let user_id: UserId = reference.parse().map_err(|_| {
            BillingError::MalformedPayload(format!(
                "client_reference_id '{}' is not a user id",
                reference
            ))
        })?;

        let Some(subscription_id) = session.subscription.clone() else {
            tracing::warn!(
                session_id = %session.id,
                user_id = %user_id,
                "Checkout completed without a subscription"
            );
            return Ok(Err(NO_REFERENCE));
        };

        let price_id = session.price_id().ok_or_else(|| {
            BillingError::MalformedPayload(format!(
                "checkout session {} has no {} metadata",
                session.id,
                events::PRICE_ID_METADATA_KEY
            ))
        })?;

        let plan_id = self.config.plan_for_price_id(price_id).ok_or_else(|| {
            tracing::error!(
                session_id = %session.id,
                price_id = %price_id,
                "Checkout for a price that maps to no plan"
            );
            BillingError::UnknownPlan(format!("price {}", price_id))
        })?;
        let plan = self.catalog.resolve(plan_id)?;

        // Derived from the session itself so redelivery writes the same row
        let period_start = events::timestamp("created", session.created)?;
        let period_end = add_one_month(period_start).ok_or_else(|| {
            BillingError::MalformedPayload(format!("created {} is out of range", period_start))
        })?;

        let written = self
            .store
            .upsert_on_checkout(CheckoutSubscription {
                user_id,
                plan_id: plan.id.clone(),
                period_start,
                period_end,
                external_subscription_id: subscription_id,
                external_customer_id: session.customer.clone(),
            })
            .await;

        match written {
            Ok(outcome) => Ok(Ok(outcome)),
            // Redelivery cannot fix this; acknowledge so the provider stops retrying
            Err(BillingError::Conflict(msg)) => {
                tracing::error!(
                    session_id = %session.id,
                    user_id = %user_id,
                    error = %msg,
                    "Checkout subscription is already stored for another user"
                );
                Ok(Err("subscription already belongs to another user"))
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_subscription_updated(
        &self,
        update: &SubscriptionUpdated,
    ) -> BillingResult<UpdateOutcome> {
        self.store
            .update_status(&update.id, update.status, update.period_start, update.period_end)
            .await
    }
}

fn no_subscription(event_id: String, event_type: String, invoice: &InvoicePayment) -> WebhookOutcome {
    tracing::info!(invoice_id = %invoice.id, "Invoice is not tied to a subscription");
    WebhookOutcome::NoOp {
        event_id,
        event_type,
        reason: "invoice has no subscription",
    }
}
