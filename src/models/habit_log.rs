use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per (habit, day). A second write for the same day overwrites.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HabitLog {
    pub id: Uuid,
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub log_date: NaiveDate,
    pub completed: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub habit_id: Uuid,
    pub user_id: Uuid,
    pub log_date: NaiveDate,
    pub completed: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HabitStats {
    pub habit_id: Uuid,
    pub habit_name: String,
    pub total_days: i64,
    pub completed_days: i64,
    pub completion_rate: f64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub last_completed_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub habits: Vec<HabitStats>,
    pub overall_streak: u32,
    pub best_overall_streak: u32,
}
