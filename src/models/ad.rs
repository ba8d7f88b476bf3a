use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Free users see one ad every this many actions.
pub const AD_FREQUENCY: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ad {
    pub id: Uuid,
    pub name: String,
    pub text: String,
    pub image_url: Option<String>,
    pub button_text: Option<String>,
    pub button_url: Option<String>,
    pub is_active: bool,
    pub priority: i32,
    pub views_count: i64,
    pub clicks_count: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Ad {
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |start| start <= now)
            && self.ends_at.map_or(true, |end| now <= end)
    }

    /// Selection weight; priority 0 still gets picked.
    pub fn weight(&self) -> u32 {
        self.priority.max(0) as u32 + 1
    }
}
