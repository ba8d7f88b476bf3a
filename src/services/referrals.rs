use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::referral::{
    ReferralOutcome, ReferralOverview, ReferralStats, ReferrerReward, ReferrerSummary, Stage1Grant,
    REFERRAL_CLAIM_WINDOW_MINUTES, REFERRAL_STAGE2_BONUS, REFERRAL_STAGE2_STREAK,
    REFERRAL_UNLOCK_STREAK,
};
use crate::models::user::User;
use crate::repository::Repository;
use crate::services::streak;

/// Accepts a bare code or a `ref_`-prefixed start payload.
pub fn normalize_code(raw: &str) -> Option<&str> {
    let code = raw.trim();
    let code = code.strip_prefix("ref_").unwrap_or(code);
    (!code.is_empty()).then_some(code)
}

/// Whether a registration may carry a referral code into stage 1. A returning
/// user qualifies only while unreferred and shortly after sign-up, so a retried
/// registration whose first attempt failed midway still gets its referral.
pub fn can_claim_referral(user: &User, is_new: bool, now: DateTime<Utc>) -> bool {
    is_new
        || (user.referred_by.is_none()
            && now.signed_duration_since(user.created_at)
                <= Duration::minutes(REFERRAL_CLAIM_WINDOW_MINUTES))
}

/// Stage 1, run once when a new user arrives with a referral code.
///
/// Checks run in a fixed order: unknown code, self-referral, the referrer's
/// streak gate, then duplicate referral. The referred user always gets the
/// stage-1 days; the referrer gets days while bonus slots remain and a
/// capped discount bump after that.
pub async fn apply_stage1(
    repo: &dyn Repository,
    referred: &User,
    code: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> AppResult<ReferralOutcome> {
    let referrer = repo
        .get_user_by_referral_code(code)
        .await?
        .ok_or(AppError::InvalidReferralCode)?;

    if referrer.id == referred.id {
        return Err(AppError::SelfReferral);
    }

    let referrer_streak = streak::overall_streak(repo, referrer.id, today).await?;
    if referrer_streak < REFERRAL_UNLOCK_STREAK {
        return Err(AppError::ReferralNotUnlocked {
            streak: referrer_streak,
            required: REFERRAL_UNLOCK_STREAK,
        });
    }

    if repo.get_referral_by_referred(referred.id).await?.is_some() {
        return Err(AppError::AlreadyReferred);
    }

    let grant = Stage1Grant::new(referrer.id, referred.id, code.to_string());

    // Losing the insert race to a concurrent registration is the same
    // rejection as finding the row above.
    let Some(applied) = repo.apply_referral_stage1(&grant, now).await? else {
        tracing::debug!(referred_id = %referred.id, "Referral row already present");
        return Err(AppError::AlreadyReferred);
    };

    tracing::info!(
        referral_id = %applied.referral.id,
        referrer_id = %referrer.id,
        referred_id = %referred.id,
        gave_discount = applied.referral.gave_discount,
        "Referral stage 1 applied"
    );

    Ok(ReferralOutcome {
        stage: 1,
        referrer_id: referrer.id,
        referred_id: referred.id,
        referrer_reward: applied.referrer_reward,
        referred_bonus_days: grant.bonus_days,
    })
}

/// Stage 2, checked on every completion against the referred user's own
/// overall streak. Not being due yet is not an error.
pub async fn apply_stage2(
    repo: &dyn Repository,
    referred_id: Uuid,
    referred_streak: u32,
    now: DateTime<Utc>,
) -> AppResult<Option<ReferralOutcome>> {
    if referred_streak < REFERRAL_STAGE2_STREAK {
        return Ok(None);
    }

    let Some(pending) = repo.get_pending_stage2_referral(referred_id).await? else {
        return Ok(None);
    };

    let Some(referral) = repo
        .apply_referral_stage2(pending.id, REFERRAL_STAGE2_BONUS, now)
        .await?
    else {
        tracing::debug!(referral_id = %pending.id, "Referral stage 2 already applied");
        return Ok(None);
    };

    tracing::info!(
        referral_id = %referral.id,
        referrer_id = %referral.referrer_id,
        referred_id = %referral.referred_id,
        "Referral stage 2 applied"
    );

    Ok(Some(ReferralOutcome {
        stage: 2,
        referrer_id: referral.referrer_id,
        referred_id: referral.referred_id,
        referrer_reward: ReferrerReward::Days {
            days: REFERRAL_STAGE2_BONUS,
        },
        referred_bonus_days: REFERRAL_STAGE2_BONUS,
    }))
}

pub async fn stats(repo: &dyn Repository, user: &User, today: NaiveDate) -> AppResult<ReferralStats> {
    let counts = repo.referral_counts(user.id).await?;
    let current_streak = streak::overall_streak(repo, user.id, today).await?;

    Ok(ReferralStats {
        counts,
        accumulated_discount: user.discount_percent,
        can_invite: current_streak >= REFERRAL_UNLOCK_STREAK,
        current_streak,
        days_until_unlock: REFERRAL_UNLOCK_STREAK.saturating_sub(current_streak),
    })
}

/// The user who referred `user`, if any.
pub async fn referrer_of(repo: &dyn Repository, user: &User) -> AppResult<Option<User>> {
    match user.referred_by {
        Some(id) => repo.get_user(id).await,
        None => Ok(None),
    }
}

pub async fn overview(
    repo: &dyn Repository,
    user: &User,
    invite_link: String,
    today: NaiveDate,
) -> AppResult<ReferralOverview> {
    Ok(ReferralOverview {
        stats: stats(repo, user, today).await?,
        invite_link,
        referrals: repo.list_referrals_by_referrer(user.id).await?,
        referred_by: referrer_of(repo, user).await?.map(ReferrerSummary::from),
    })
}
