use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::achievement::{AchievementOverview, AchievementTier, NextAchievement, TierConfig, TIERS};
use crate::repository::Repository;
use crate::services::streak;

/// Unlocks the lowest reached tier the user does not have yet, paying out its
/// bonus days. At most one tier per call; the next event picks up the next.
pub async fn check_and_unlock(
    repo: &dyn Repository,
    user_id: Uuid,
    streak: u32,
    now: DateTime<Utc>,
) -> AppResult<Option<&'static TierConfig>> {
    let unlocked: HashSet<AchievementTier> = repo
        .list_achievements(user_id)
        .await?
        .into_iter()
        .map(|a| a.tier)
        .collect();

    let Some(tier) = TIERS
        .iter()
        .find(|t| t.streak_days <= streak && !unlocked.contains(&t.tier))
    else {
        return Ok(None);
    };

    if !repo.unlock_achievement(user_id, tier, now).await? {
        tracing::debug!(user_id = %user_id, tier = ?tier.tier, "Achievement already recorded");
        return Ok(None);
    }

    tracing::info!(
        user_id = %user_id,
        tier = ?tier.tier,
        bonus_days = tier.bonus_days,
        "Achievement unlocked"
    );
    Ok(Some(tier))
}

pub fn next_achievement(streak: u32, unlocked: &[AchievementTier]) -> Option<NextAchievement> {
    TIERS
        .iter()
        .find(|t| t.streak_days > streak && !unlocked.contains(&t.tier))
        .map(|t| NextAchievement {
            config: *t,
            days_left: t.streak_days - streak,
        })
}

pub async fn overview(
    repo: &dyn Repository,
    user_id: Uuid,
    today: NaiveDate,
) -> AppResult<AchievementOverview> {
    let unlocked = repo.list_achievements(user_id).await?;
    let current_streak = streak::overall_streak(repo, user_id, today).await?;
    let tiers: Vec<AchievementTier> = unlocked.iter().map(|a| a.tier).collect();

    Ok(AchievementOverview {
        next: next_achievement(current_streak, &tiers),
        unlocked,
        current_streak,
    })
}
