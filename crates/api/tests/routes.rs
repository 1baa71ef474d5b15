//! HTTP-level tests for the API router
//!
//! The billing core runs on in-memory backends with a recording gateway, so
//! these tests need neither Postgres nor Stripe.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use inspectra_api::{create_router, AppState, Config};
use inspectra_billing::gateway::{
    CheckoutSessionRequest, CreatedCheckoutSession, CreatedPortalSession, PortalSessionRequest,
};
use inspectra_billing::signature::signature_header;
use inspectra_billing::store::{CheckoutSubscription, RowWrite, StatusChange};
use inspectra_billing::{
    BillingError, BillingGateway, BillingResult, BillingService, InMemorySubscriptionRepository,
    InMemoryUsageSource, PlanCatalog, PriceIds, StripeConfig, Subscription, SubscriptionRepository,
};
use inspectra_shared::UserId;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "whsec_api_test";

// ============================================================================
// Test Utilities
// ============================================================================

struct FakeGateway {
    fail: bool,
}

#[async_trait]
impl BillingGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> BillingResult<CreatedCheckoutSession> {
        if self.fail {
            return Err(BillingError::StripeApi("api key sk_test_hidden rejected".into()));
        }
        Ok(CreatedCheckoutSession {
            session_id: format!("cs_test_{}", request.user_id),
            url: Some("https://checkout.stripe.test/pay".to_string()),
        })
    }

    async fn create_portal_session(
        &self,
        request: &PortalSessionRequest,
    ) -> BillingResult<CreatedPortalSession> {
        if self.fail {
            return Err(BillingError::StripeApi("timeout".into()));
        }
        Ok(CreatedPortalSession {
            url: format!("https://billing.stripe.test/{}", request.customer_id),
        })
    }
}

struct FailingRepository;

#[async_trait]
impl SubscriptionRepository for FailingRepository {
    async fn find_by_user(&self, _: UserId) -> BillingResult<Option<Subscription>> {
        Err(BillingError::Database("connection refused".into()))
    }

    async fn find_by_external_id(&self, _: &str) -> BillingResult<Option<Subscription>> {
        Err(BillingError::Database("connection refused".into()))
    }

    async fn upsert(&self, _: &CheckoutSubscription) -> BillingResult<RowWrite> {
        Err(BillingError::Database("connection refused".into()))
    }

    async fn apply_change(&self, _: &str, _: &StatusChange) -> BillingResult<RowWrite> {
        Err(BillingError::Database("connection refused".into()))
    }
}

fn config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        allowed_origins: vec![],
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        run_migrations: false,
        log_json: false,
    }
}

fn stripe_config() -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_api".to_string(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        price_ids: PriceIds {
            pro: "price_pro".to_string(),
            business: "price_business".to_string(),
            pro_annual: None,
            business_annual: None,
        },
        app_base_url: "https://app.inspectra.test".to_string(),
    }
}

fn app_with(repo: Arc<dyn SubscriptionRepository>, gateway_fails: bool) -> Router {
    let billing = BillingService::with_backends(
        stripe_config(),
        Arc::new(PlanCatalog::builtin()),
        repo,
        Arc::new(InMemoryUsageSource::new()),
        Arc::new(FakeGateway {
            fail: gateway_fails,
        }),
    );
    create_router(AppState::without_database(config(), billing))
}

fn app() -> (Router, Arc<InMemorySubscriptionRepository>) {
    let repo = Arc::new(InMemorySubscriptionRepository::new());
    (app_with(repo.clone(), false), repo)
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn webhook_request(payload: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/billing/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_vec())).unwrap()
}

fn checkout_event(user_id: UserId) -> Vec<u8> {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    serde_json::to_vec(&json!({
        "id": "evt_checkout",
        "type": "checkout.session.completed",
        "created": created,
        "data": { "object": {
            "id": "cs_1",
            "client_reference_id": user_id.to_string(),
            "customer": "cus_1",
            "subscription": "sub_1",
            "created": created,
            "metadata": { "price_id": "price_pro" }
        }}
    }))
    .unwrap()
}

fn sign(payload: &[u8]) -> String {
    signature_header(
        WEBHOOK_SECRET,
        OffsetDateTime::now_utc().unix_timestamp(),
        payload,
    )
    .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_without_database() {
    let (app, _) = app();
    let (status, body) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "not_configured");
}

#[tokio::test]
async fn test_liveness() {
    let (app, _) = app();
    let (status, _) = send(app, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Webhook
// ============================================================================

#[tokio::test]
async fn test_webhook_rejects_non_post() {
    let (app, _) = app();
    let (status, _) = send(app, get("/api/v1/billing/webhook")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_webhook_missing_signature() {
    let (app, repo) = app();
    let payload = checkout_event(UserId::new());

    let (status, body) = send(app, webhook_request(&payload, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_SIGNATURE");
    assert!(repo.is_empty().await);
}

#[tokio::test]
async fn test_webhook_tampered_body() {
    let (app, repo) = app();
    let payload = checkout_event(UserId::new());
    let signature = sign(&payload);
    let tampered = String::from_utf8(payload)
        .unwrap()
        .replace("price_pro", "price_bus");

    let (status, _) = send(app, webhook_request(tampered.as_bytes(), Some(&signature))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(repo.is_empty().await);
}

#[tokio::test]
async fn test_webhook_checkout_creates_subscription() {
    let (app, repo) = app();
    let user = UserId::new();
    let payload = checkout_event(user);

    let (status, body) = send(app, webhook_request(&payload, Some(&sign(&payload)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    let rows = repo.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, user);
    assert_eq!(rows[0].plan_id, "pro");
}

#[tokio::test]
async fn test_webhook_unknown_event_acknowledged() {
    let (app, repo) = app();
    let payload = serde_json::to_vec(&json!({
        "id": "evt_other",
        "type": "customer.created",
        "created": OffsetDateTime::now_utc().unix_timestamp(),
        "data": { "object": { "id": "cus_1" } }
    }))
    .unwrap();

    let (status, body) = send(app, webhook_request(&payload, Some(&sign(&payload)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(repo.is_empty().await);
}

#[tokio::test]
async fn test_webhook_malformed_body() {
    let (app, _) = app();
    let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    let (status, _) = send(app, webhook_request(payload, Some(&sign(payload)))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_checkout_for_another_users_subscription_is_acknowledged() {
    let (app, repo) = app();
    let owner = UserId::new();
    let first = checkout_event(owner);
    send(app.clone(), webhook_request(&first, Some(&sign(&first)))).await;

    let stolen = checkout_event(UserId::new());
    let (status, body) = send(app, webhook_request(&stolen, Some(&sign(&stolen)))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    let rows = repo.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, owner);
}

#[tokio::test]
async fn test_webhook_store_failure_is_retryable() {
    let app = app_with(Arc::new(FailingRepository), false);
    let payload = checkout_event(UserId::new());

    let (status, body) = send(app, webhook_request(&payload, Some(&sign(&payload)))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "DATABASE_ERROR");
}

// ============================================================================
// Checkout & Portal
// ============================================================================

#[tokio::test]
async fn test_checkout_requires_fields() {
    let (app, _) = app();
    let user = UserId::new().to_string();

    for body in [
        json!({ "userId": user }),
        json!({ "priceId": "price_pro" }),
        json!({ "priceId": "price_pro", "userId": "not-a-uuid" }),
        json!({ "priceId": "price_gold", "userId": user }),
        json!({ "priceId": 42, "userId": user }),
    ] {
        let (status, _) = send(app.clone(), json_post("/api/v1/billing/checkout", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_checkout_malformed_json() {
    let (app, _) = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/billing/checkout")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_checkout_returns_session() {
    let (app, _) = app();
    let user = UserId::new();

    let (status, body) = send(
        app,
        json_post(
            "/api/v1/billing/checkout",
            json!({ "priceId": "price_pro", "userId": user.to_string() }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], format!("cs_test_{}", user));
}

#[tokio::test]
async fn test_checkout_provider_failure_is_opaque() {
    let app = app_with(Arc::new(InMemorySubscriptionRepository::new()), true);

    let (status, body) = send(
        app,
        json_post(
            "/api/v1/billing/checkout",
            json!({ "priceId": "price_pro", "userId": UserId::new().to_string() }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "PROVIDER_ERROR");
    assert!(!body.to_string().contains("sk_test_hidden"));
}

#[tokio::test]
async fn test_portal() {
    let (app, _) = app();

    let (status, _) = send(app.clone(), json_post("/api/v1/billing/portal", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app,
        json_post("/api/v1/billing/portal", json!({ "customerId": "cus_9" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], "https://billing.stripe.test/cus_9");
}

// ============================================================================
// Entitlements
// ============================================================================

#[tokio::test]
async fn test_entitlement_check_for_free_user() {
    let (app, _) = app();
    let user = UserId::new();

    let (status, body) = send(
        app,
        get(&format!(
            "/api/v1/entitlements/{}/check?feature=create_property",
            user
        )),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["decision"], "allow");
    assert_eq!(body["remaining"], 1);
    assert_eq!(body["feature"], "create_property");
}

#[tokio::test]
async fn test_entitlement_check_over_limit_is_denied() {
    let (app, _) = app();
    let user = UserId::new();

    let (status, body) = send(
        app,
        get(&format!(
            "/api/v1/entitlements/{}/check?feature=create_report&delta=2",
            user
        )),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "limit_reached");
    assert_eq!(body["limit"], 1);
}

#[tokio::test]
async fn test_entitlement_check_bad_input() {
    let (app, _) = app();
    let user = UserId::new();

    for uri in [
        format!("/api/v1/entitlements/{}/check", user),
        format!("/api/v1/entitlements/{}/check?feature=teleport", user),
        format!("/api/v1/entitlements/{}/check?feature=add_photos", user),
        format!("/api/v1/entitlements/{}/check?feature=add_photos&propertyId=x", user),
        format!("/api/v1/entitlements/{}/check?feature=create_report&delta=-1", user),
        "/api/v1/entitlements/nobody/check?feature=create_report".to_string(),
    ] {
        let (status, _) = send(app.clone(), get(&uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
    }
}

#[tokio::test]
async fn test_entitlement_check_fails_closed() {
    let app = app_with(Arc::new(FailingRepository), false);

    let (status, body) = send(
        app,
        get(&format!(
            "/api/v1/entitlements/{}/check?feature=create_property",
            UserId::new()
        )),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["reason"], "plan_unavailable");
}

#[tokio::test]
async fn test_entitlement_summary() {
    let (app, _) = app();
    let user = UserId::new();
    let payload = checkout_event(user);
    let (status, _) = send(app.clone(), webhook_request(&payload, Some(&sign(&payload)))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(app, get(&format!("/api/v1/entitlements/{}", user))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["plan_id"], "pro");
    assert_eq!(body["state"], "active");
    assert_eq!(body["properties"]["remaining"], 25);
}
