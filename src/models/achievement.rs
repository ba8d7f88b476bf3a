use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Achievement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: AchievementTier,
    pub streak_days: i32,
    pub bonus_days: i32,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "achievement_tier")]
pub enum AchievementTier {
    #[sqlx(rename = "streak_7")]
    #[serde(rename = "streak_7")]
    Streak7,
    #[sqlx(rename = "streak_14")]
    #[serde(rename = "streak_14")]
    Streak14,
    #[sqlx(rename = "streak_30")]
    #[serde(rename = "streak_30")]
    Streak30,
    #[sqlx(rename = "streak_60")]
    #[serde(rename = "streak_60")]
    Streak60,
    #[sqlx(rename = "streak_100")]
    #[serde(rename = "streak_100")]
    Streak100,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierConfig {
    pub tier: AchievementTier,
    pub streak_days: u32,
    pub bonus_days: i32,
    pub title: &'static str,
    pub description: &'static str,
    pub emoji: &'static str,
}

/// Ascending by threshold; the engine relies on this order.
pub const TIERS: [TierConfig; 5] = [
    TierConfig {
        tier: AchievementTier::Streak7,
        streak_days: 7,
        bonus_days: 0,
        title: "First week",
        description: "Referral program unlocked!",
        emoji: "🔓",
    },
    TierConfig {
        tier: AchievementTier::Streak14,
        streak_days: 14,
        bonus_days: 2,
        title: "Two weeks",
        description: "+2 days of Premium",
        emoji: "🔥",
    },
    TierConfig {
        tier: AchievementTier::Streak30,
        streak_days: 30,
        bonus_days: 3,
        title: "Month of strength",
        description: "+3 days of Premium",
        emoji: "💪",
    },
    TierConfig {
        tier: AchievementTier::Streak60,
        streak_days: 60,
        bonus_days: 5,
        title: "Two months",
        description: "+5 days of Premium",
        emoji: "⭐️",
    },
    TierConfig {
        tier: AchievementTier::Streak100,
        streak_days: 100,
        bonus_days: 7,
        title: "Legend",
        description: "+7 days of Premium",
        emoji: "🏆",
    },
];

#[cfg(test)]
impl AchievementTier {
    pub fn config(self) -> Option<&'static TierConfig> {
        TIERS.iter().find(|cfg| cfg.tier == self)
    }
}

#[derive(Debug, Serialize)]
pub struct NextAchievement {
    #[serde(flatten)]
    pub config: TierConfig,
    pub days_left: u32,
}

#[derive(Debug, Serialize)]
pub struct AchievementOverview {
    pub unlocked: Vec<Achievement>,
    pub next: Option<NextAchievement>,
    pub current_streak: u32,
}
