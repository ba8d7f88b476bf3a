use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::AppResult;
use crate::handlers::load_user;
use crate::models::achievement::AchievementOverview;
use crate::models::habit_log::UserStats;
use crate::models::referral::ReferralOverview;
use crate::services::{achievements, referrals, streak};
use crate::AppState;

pub async fn get_stats(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<UserStats>> {
    let user = load_user(&state, external_id).await?;
    let stats = streak::user_stats(state.repo.as_ref(), user.id, state.clock.today()).await?;
    Ok(Json(stats))
}

pub async fn get_achievements(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<AchievementOverview>> {
    let user = load_user(&state, external_id).await?;
    let overview = achievements::overview(state.repo.as_ref(), user.id, state.clock.today()).await?;
    Ok(Json(overview))
}

pub async fn get_referrals(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<ReferralOverview>> {
    let user = load_user(&state, external_id).await?;
    let invite_link = state.config.invite_link(&user.referral_code);
    let overview =
        referrals::overview(state.repo.as_ref(), &user, invite_link, state.clock.today()).await?;
    Ok(Json(overview))
}
