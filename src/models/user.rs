use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const FREE_HABITS_LIMIT: i64 = 3;
pub const PREMIUM_HABITS_LIMIT: i64 = 100;

pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub external_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub timezone: String,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub discount_percent: i32,
    pub action_count: i32,
    pub broadcast_opt_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Premium is re-derived from the expiry on every read; `now` must be
    /// strictly before the expiry.
    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        matches!(self.subscription_expires_at, Some(expires) if now < expires)
    }

    pub fn habit_limit(&self, now: DateTime<Utc>) -> i64 {
        if self.has_active_subscription(now) {
            PREMIUM_HABITS_LIMIT
        } else {
            FREE_HABITS_LIMIT
        }
    }
}

/// Fields refreshed on every contact from the chat transport.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub timezone: String,
    pub referral_code: String,
}

/// 6 random bytes, hex encoded. Assigned once at insert and never rewritten.
pub fn generate_referral_code() -> String {
    let bytes: [u8; 6] = rand::random();
    hex::encode(bytes)
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub external_id: i64,
    pub username: Option<String>,
    pub display_name: String,
    pub timezone: String,
    pub is_premium: bool,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub referral_code: String,
    pub discount_percent: i32,
    pub habit_limit: i64,
    pub overall_streak: Option<u32>,
    pub stats_available: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user: User, now: DateTime<Utc>, overall_streak: Option<u32>) -> Self {
        Self {
            is_premium: user.has_active_subscription(now),
            habit_limit: user.habit_limit(now),
            id: user.id,
            external_id: user.external_id,
            username: user.username,
            display_name: user.display_name,
            timezone: user.timezone,
            subscription_expires_at: user.subscription_expires_at,
            referral_code: user.referral_code,
            discount_percent: user.discount_percent,
            stats_available: overall_streak.is_some(),
            overall_streak,
            created_at: user.created_at,
        }
    }
}
