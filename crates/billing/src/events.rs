//! Webhook event payloads
//!
//! Provider events are parsed in two steps: first the envelope
//! (`id`, `type`, `created`, `data.object`), then `data.object` into the typed
//! payload selected by `type`. Only the fields the handlers act on are
//! modelled; everything else in the provider object is ignored. Types we do
//! not handle parse to [`WebhookEvent::Unknown`] without looking at the body.

use std::collections::HashMap;

use inspectra_shared::SubscriptionStatus;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";
pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";

/// Metadata key carrying the purchased price on checkout sessions
pub const PRICE_ID_METADATA_KEY: &str = "price_id";

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// `checkout.session.completed`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSessionCompleted {
    pub id: String,
    /// Our user id, set when the session was created
    pub client_reference_id: Option<String>,
    pub customer: Option<String>,
    /// External subscription id; absent for one-off payments
    pub subscription: Option<String>,
    pub created: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionCompleted {
    pub fn price_id(&self) -> Option<&str> {
        self.metadata
            .get(PRICE_ID_METADATA_KEY)
            .map(String::as_str)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    customer: Option<String>,
}

/// `customer.subscription.updated`, with the provider status already mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdated {
    pub id: String,
    pub status: SubscriptionStatus,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    pub customer: Option<String>,
}

/// `customer.subscription.deleted`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionDeleted {
    pub id: String,
}

/// `invoice.payment_succeeded` / `invoice.payment_failed`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvoicePayment {
    pub id: String,
    pub subscription: Option<String>,
    pub customer: Option<String>,
}

/// Closed set of events the webhook handler understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutSessionCompleted(CheckoutSessionCompleted),
    SubscriptionUpdated(SubscriptionUpdated),
    SubscriptionDeleted(SubscriptionDeleted),
    InvoicePaymentSucceeded(InvoicePayment),
    InvoicePaymentFailed(InvoicePayment),
    Unknown,
}

/// A validated event plus its envelope fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub id: String,
    pub event_type: String,
    pub created: OffsetDateTime,
    pub event: WebhookEvent,
}

/// Map a provider subscription status onto ours
pub fn map_provider_status(status: &str) -> Option<SubscriptionStatus> {
    match status {
        "active" | "trialing" => Some(SubscriptionStatus::Active),
        "past_due" | "unpaid" => Some(SubscriptionStatus::PastDue),
        "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Canceled),
        "incomplete" => Some(SubscriptionStatus::Incomplete),
        _ => None,
    }
}

pub(crate) fn timestamp(field: &str, secs: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| BillingError::MalformedPayload(format!("{} out of range: {}", field, e)))
}

fn object<T: DeserializeOwned>(event_type: &str, value: serde_json::Value) -> BillingResult<T> {
    serde_json::from_value(value)
        .map_err(|e| BillingError::MalformedPayload(format!("{} object: {}", event_type, e)))
}

/// Parse and validate a raw webhook body
pub fn parse_event(payload: &[u8]) -> BillingResult<ParsedEvent> {
    let envelope: EventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| BillingError::MalformedPayload(format!("event envelope: {}", e)))?;

    let object_value = envelope.data.object;
    let event_type = envelope.event_type.as_str();

    let event = match event_type {
        CHECKOUT_SESSION_COMPLETED => {
            WebhookEvent::CheckoutSessionCompleted(object(event_type, object_value)?)
        }
        SUBSCRIPTION_UPDATED => {
            let raw: RawSubscription = object(event_type, object_value)?;
            let status = map_provider_status(&raw.status).ok_or_else(|| {
                BillingError::MalformedPayload(format!(
                    "unrecognised subscription status '{}'",
                    raw.status
                ))
            })?;

            WebhookEvent::SubscriptionUpdated(SubscriptionUpdated {
                id: raw.id,
                status,
                period_start: timestamp("current_period_start", raw.current_period_start)?,
                period_end: timestamp("current_period_end", raw.current_period_end)?,
                customer: raw.customer,
            })
        }
        SUBSCRIPTION_DELETED => WebhookEvent::SubscriptionDeleted(object(event_type, object_value)?),
        INVOICE_PAYMENT_SUCCEEDED => {
            WebhookEvent::InvoicePaymentSucceeded(object(event_type, object_value)?)
        }
        INVOICE_PAYMENT_FAILED => WebhookEvent::InvoicePaymentFailed(object(event_type, object_value)?),
        _ => WebhookEvent::Unknown,
    };

    Ok(ParsedEvent {
        created: timestamp("created", envelope.created)?,
        id: envelope.id,
        event_type: envelope.event_type,
        event,
    })
}
