use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::events::ProgressEvent;
use crate::handlers::load_user;
use crate::models::referral::ReferralOutcome;
use crate::models::user::{generate_referral_code, NewUser, User, UserProfile, DEFAULT_TIMEZONE};
use crate::services::{referrals, streak};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    pub external_id: i64,

    #[validate(length(max = 64, message = "Username must be under 64 characters"))]
    pub username: Option<String>,

    #[validate(length(min = 1, max = 255, message = "Display name must be 1-255 characters"))]
    pub display_name: String,

    pub timezone: Option<String>,

    /// Start payload from the invite link, with or without the `ref_` prefix.
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReferralRejection {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserProfile,
    pub is_new: bool,
    pub referral: Option<ReferralOutcome>,
    pub referral_error: Option<ReferralRejection>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (user, is_new) = state
        .repo
        .upsert_user(&NewUser {
            external_id: body.external_id,
            username: body.username.filter(|u| !u.is_empty()),
            display_name: body.display_name,
            timezone: body.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.into()),
            referral_code: generate_referral_code(),
        })
        .await?;

    let mut referral = None;
    let mut referral_error = None;

    let now = state.clock.now();
    let code = body
        .referral_code
        .as_deref()
        .and_then(referrals::normalize_code)
        .filter(|_| referrals::can_claim_referral(&user, is_new, now));
    if let Some(code) = code {
        match referrals::apply_stage1(state.repo.as_ref(), &user, code, state.clock.today(), now)
            .await
        {
            Ok(outcome) => {
                state.events.publish(ProgressEvent::ReferralStageCompleted {
                    outcome: outcome.clone(),
                });
                referral = Some(outcome);
            }
            Err(e) if e.is_referral_rejection() => {
                tracing::info!(user_id = %user.id, code = e.code(), "Referral rejected at registration");
                referral_error = Some(ReferralRejection {
                    code: e.code(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    // Stage 1 just granted days; read the fresh expiry back.
    let user = if referral.is_some() {
        load_user(&state, user.external_id).await?
    } else {
        user
    };

    if is_new {
        tracing::info!(user_id = %user.id, external_id = user.external_id, "User registered");
    }

    let profile = profile_for(&state, user).await;
    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(RegisterResponse {
            user: profile,
            is_new,
            referral,
            referral_error,
        }),
    ))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<UserProfile>> {
    let user = load_user(&state, external_id).await?;
    Ok(Json(profile_for(&state, user).await))
}

/// The streak is decoration on the profile: a failed lookup is reported as
/// unavailable rather than failing the request or showing zero.
async fn profile_for(state: &AppState, user: User) -> UserProfile {
    let overall_streak =
        match streak::overall_streak(state.repo.as_ref(), user.id, state.clock.today()).await {
            Ok(streak) => Some(streak),
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Overall streak unavailable");
                None
            }
        };

    UserProfile::new(user, state.clock.now(), overall_streak)
}
