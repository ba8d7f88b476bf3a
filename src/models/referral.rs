use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::User;

pub const REFERRAL_UNLOCK_STREAK: u32 = 7;
pub const REFERRAL_STAGE2_STREAK: u32 = 7;
pub const REFERRAL_STAGE1_BONUS: i32 = 2;
pub const REFERRAL_STAGE2_BONUS: i32 = 3;
pub const REFERRAL_BONUS_LIMIT: i64 = 5;
pub const REFERRAL_DISCOUNT_PER_REF: i32 = 25;
pub const MAX_REFERRAL_DISCOUNT: i32 = 50;
/// How long after sign-up a repeated registration may still bring a code.
pub const REFERRAL_CLAIM_WINDOW_MINUTES: i64 = 30;

/// One row per referred user. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub referral_code: String,
    pub stage1_applied: bool,
    pub stage1_bonus_days: i32,
    pub stage2_applied: bool,
    pub stage2_bonus_days: i32,
    /// Once set, the referral never earns stage-2 days.
    pub gave_discount: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Referral {
    pub fn is_pending_stage2(&self) -> bool {
        self.stage1_applied && !self.stage2_applied && !self.gave_discount
    }
}

/// Stage 1 inputs. The repository picks days or discount mode inside its own
/// write unit, after counting the referrer's bonus referrals under a lock.
#[derive(Debug, Clone)]
pub struct Stage1Grant {
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub referral_code: String,
    /// Days for each party while the referrer still has bonus slots.
    pub bonus_days: i32,
    pub bonus_limit: i64,
    pub discount_step: i32,
    pub discount_cap: i32,
}

impl Stage1Grant {
    pub fn new(referrer_id: Uuid, referred_id: Uuid, referral_code: String) -> Self {
        Self {
            referrer_id,
            referred_id,
            referral_code,
            bonus_days: REFERRAL_STAGE1_BONUS,
            bonus_limit: REFERRAL_BONUS_LIMIT,
            discount_step: REFERRAL_DISCOUNT_PER_REF,
            discount_cap: MAX_REFERRAL_DISCOUNT,
        }
    }
}

/// Result of a stage 1 write: the new row and what the referrer actually got.
#[derive(Debug, Clone)]
pub struct Stage1Applied {
    pub referral: Referral,
    pub referrer_reward: ReferrerReward,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReferrerReward {
    Days { days: i32 },
    Discount { added_percent: i32 },
}

/// Descriptor returned to the transport layer for notifications.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralOutcome {
    pub stage: u8,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub referrer_reward: ReferrerReward,
    pub referred_bonus_days: i32,
}

impl ReferralOutcome {
    pub fn is_discount(&self) -> bool {
        matches!(self.referrer_reward, ReferrerReward::Discount { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
pub struct ReferralCounts {
    pub total: i64,
    pub bonus: i64,
    pub discount: i64,
    pub stage1_completed: i64,
    pub stage2_completed: i64,
    pub total_bonus_days: i64,
}

#[derive(Debug, Serialize)]
pub struct ReferralStats {
    #[serde(flatten)]
    pub counts: ReferralCounts,
    pub accumulated_discount: i32,
    pub can_invite: bool,
    pub current_streak: u32,
    pub days_until_unlock: u32,
}

#[derive(Debug, Serialize)]
pub struct ReferrerSummary {
    pub id: Uuid,
    pub external_id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

impl From<User> for ReferrerSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            external_id: user.external_id,
            username: user.username,
            display_name: user.display_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReferralOverview {
    pub stats: ReferralStats,
    pub invite_link: String,
    pub referrals: Vec<Referral>,
    pub referred_by: Option<ReferrerSummary>,
}
