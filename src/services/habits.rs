use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::habit::{CreateHabitRequest, Habit, HabitWithStatus, NewHabit};
use crate::models::habit_log::{HabitLog, LogEntry};
use crate::models::user::User;
use crate::repository::Repository;

/// Creates an active habit unless the user is at their tier's cap.
pub async fn create(
    repo: &dyn Repository,
    user: &User,
    body: CreateHabitRequest,
    now: DateTime<Utc>,
) -> AppResult<Habit> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Name must not be blank".into()));
    }

    let limit = user.habit_limit(now);
    let active = repo.count_active_habits(user.id).await?;
    if active >= limit {
        return Err(AppError::HabitLimitReached { limit });
    }

    let habit = repo
        .create_habit(&NewHabit {
            user_id: user.id,
            name: name.to_string(),
            description: body.description.filter(|d| !d.trim().is_empty()),
            frequency: body.frequency.unwrap_or_default(),
            reminder_time: body.reminder_time,
        })
        .await?;

    tracing::info!(user_id = %user.id, habit_id = %habit.id, "Habit created");
    Ok(habit)
}

/// Active habit owned by `user_id`. Someone else's habit is `AccessDenied`;
/// a missing or deleted one is `NotFound`.
pub async fn owned_habit(repo: &dyn Repository, user_id: Uuid, habit_id: Uuid) -> AppResult<Habit> {
    let habit = repo
        .get_habit(habit_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Habit not found".into()))?;

    if habit.user_id != user_id {
        return Err(AppError::AccessDenied);
    }
    if !habit.is_active {
        return Err(AppError::NotFound("Habit not found".into()));
    }
    Ok(habit)
}

/// Upserts the (habit, day) log with the given completion flag.
pub async fn set_completion(
    repo: &dyn Repository,
    user_id: Uuid,
    habit_id: Uuid,
    day: NaiveDate,
    completed: bool,
) -> AppResult<HabitLog> {
    let habit = owned_habit(repo, user_id, habit_id).await?;

    repo.upsert_log(&LogEntry {
        habit_id: habit.id,
        user_id,
        log_date: day,
        completed,
        note: None,
    })
    .await
}

pub async fn list_with_status(
    repo: &dyn Repository,
    user_id: Uuid,
    today: NaiveDate,
) -> AppResult<Vec<HabitWithStatus>> {
    let habits = repo.list_active_habits(user_id).await?;
    let done_today: HashSet<Uuid> = repo
        .list_logs_for_user_on(user_id, today)
        .await?
        .into_iter()
        .filter(|log| log.completed)
        .map(|log| log.habit_id)
        .collect();

    Ok(habits
        .into_iter()
        .map(|habit| HabitWithStatus {
            completed_today: done_today.contains(&habit.id),
            habit,
        })
        .collect())
}

/// Soft delete. Past logs stay attached to the habit.
pub async fn delete(repo: &dyn Repository, user_id: Uuid, habit_id: Uuid) -> AppResult<()> {
    let habit = owned_habit(repo, user_id, habit_id).await?;
    repo.deactivate_habit(habit.id).await?;
    tracing::info!(user_id = %user_id, habit_id = %habit.id, "Habit deactivated");
    Ok(())
}
