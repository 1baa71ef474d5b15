//! Entitlement routes

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use inspectra_billing::{Decision, EntitlementSummary, Feature};
use inspectra_shared::{PropertyId, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    pub feature: Option<String>,
    pub delta: Option<u64>,
    pub property_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub user_id: UserId,
    pub feature: &'static str,
    pub requested: u64,
    pub allowed: bool,
    #[serde(flatten)]
    pub decision: Decision,
}

fn parse_user(raw: &str) -> ApiResult<UserId> {
    raw.parse()
        .map_err(|_| ApiError::Validation("userId must be a UUID".to_string()))
}

/// May the user perform `feature` `delta` more times right now?
pub async fn check(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<CheckQuery>, QueryRejection>,
) -> ApiResult<Json<CheckResponse>> {
    let Query(query) = query?;
    let user_id = parse_user(&user_id)?;

    let property_id = query
        .property_id
        .as_deref()
        .map(|raw| {
            raw.parse::<PropertyId>()
                .map_err(|_| ApiError::Validation("propertyId must be a UUID".to_string()))
        })
        .transpose()?;

    let name = query
        .feature
        .as_deref()
        .ok_or_else(|| ApiError::Validation("feature is required".to_string()))?;
    let feature = Feature::from_name(name, property_id)?;
    let requested = query.delta.unwrap_or(1);

    let decision = state
        .billing
        .entitlements
        .check(user_id, feature, requested)
        .await;

    Ok(Json(CheckResponse {
        user_id,
        feature: feature.name(),
        requested,
        allowed: decision.is_allowed(),
        decision,
    }))
}

/// Plan, entitlement state and remaining capacity
pub async fn summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<EntitlementSummary>> {
    let user_id = parse_user(&user_id)?;
    let summary = state.billing.entitlements.summary(user_id).await?;
    Ok(Json(summary))
}
