use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::handlers::load_user;
use crate::services::subscription;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AddDaysRequest {
    pub days: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetExpiryRequest {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub is_premium: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn add_days(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(body): Json<AddDaysRequest>,
) -> AppResult<Json<SubscriptionResponse>> {
    let user = load_user(&state, external_id).await?;
    let now = state.clock.now();
    let expires_at = subscription::add_days(state.repo.as_ref(), user.id, body.days, now).await?;

    Ok(Json(SubscriptionResponse {
        is_premium: now < expires_at,
        expires_at: Some(expires_at),
    }))
}

pub async fn set_expiry(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(body): Json<SetExpiryRequest>,
) -> AppResult<Json<SubscriptionResponse>> {
    let user = load_user(&state, external_id).await?;
    subscription::set_expiry(state.repo.as_ref(), user.id, body.expires_at).await?;
    let is_premium =
        subscription::is_active(state.repo.as_ref(), user.id, state.clock.now()).await?;

    Ok(Json(SubscriptionResponse {
        is_premium,
        expires_at: Some(body.expires_at),
    }))
}
