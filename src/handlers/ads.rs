use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::load_user;
use crate::models::ad::Ad;
use crate::AppState;

/// Counts one user action; returns the ad to show, or `null`.
pub async fn next_ad(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<Option<Ad>>> {
    let user = load_user(&state, external_id).await?;
    let ad = state
        .ads
        .next_ad(state.repo.as_ref(), &user, state.clock.now())
        .await?;
    Ok(Json(ad))
}

pub async fn record_click(
    State(state): State<AppState>,
    Path(ad_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.ads.record_click(state.repo.as_ref(), ad_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
