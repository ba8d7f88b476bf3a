use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppResult;
use crate::events::{EventBus, ProgressEvent};
use crate::models::achievement::{AchievementTier, TierConfig};
use crate::models::habit_log::HabitLog;
use crate::models::referral::ReferralOutcome;
use crate::models::user::User;
use crate::repository::Repository;
use crate::services::{achievements, habits, referrals, streak};

#[derive(Debug, Serialize)]
pub struct ProgressReport {
    pub log: HabitLog,
    pub habit_streak: u32,
    pub overall_streak: u32,
    pub achievement: Option<TierConfig>,
    pub referral: Option<ReferralOutcome>,
}

/// Completion event pipeline: write today's log, recompute streaks, then let
/// the achievement and referral engines react to the new overall streak.
/// Unmarking a habit only recomputes.
pub async fn record_completion(
    repo: &dyn Repository,
    clock: &dyn Clock,
    events: &EventBus,
    user: &User,
    habit_id: Uuid,
    completed: bool,
) -> AppResult<ProgressReport> {
    let today = clock.today();
    let now = clock.now();

    let log = habits::set_completion(repo, user.id, habit_id, today, completed).await?;

    let habit_logs = repo.list_logs_for_habit(habit_id).await?;
    let habit_streak = streak::current_streak(&streak::completed_days(&habit_logs), today);
    let overall_streak = streak::overall_streak(repo, user.id, today).await?;

    let mut report = ProgressReport {
        log,
        habit_streak,
        overall_streak,
        achievement: None,
        referral: None,
    };

    if !completed {
        return Ok(report);
    }

    if let Some(tier) = achievements::check_and_unlock(repo, user.id, overall_streak, now).await? {
        events.publish(ProgressEvent::AchievementUnlocked {
            user_id: user.id,
            achievement: *tier,
        });
        if tier.tier == AchievementTier::Streak7 {
            events.publish(ProgressEvent::ReferralUnlocked { user_id: user.id });
        }
        report.achievement = Some(*tier);
    }

    if let Some(outcome) = referrals::apply_stage2(repo, user.id, overall_streak, now).await? {
        events.publish(ProgressEvent::ReferralStageCompleted {
            outcome: outcome.clone(),
        });
        report.referral = Some(outcome);
    }

    tracing::debug!(
        user_id = %user.id,
        habit_id = %habit_id,
        habit_streak,
        overall_streak,
        "Completion recorded"
    );

    Ok(report)
}
