use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Duration, NaiveDate};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::habit::Habit;
use crate::models::habit_log::{HabitLog, HabitStats, UserStats};
use crate::repository::Repository;

/// Trailing window for cross-habit streaks, in days.
pub const STREAK_WINDOW_DAYS: i64 = 365;

/// Days with a `completed = true` record. An explicit `false` counts the same
/// as no record at all.
pub fn completed_days<'a>(logs: impl IntoIterator<Item = &'a HabitLog>) -> BTreeSet<NaiveDate> {
    logs.into_iter()
        .filter(|log| log.completed)
        .map(|log| log.log_date)
        .collect()
}

/// Days on which every one of `habit_ids` was completed. Empty when there are
/// no habits, so a user without habits never has a streak.
pub fn fully_completed_days(habit_ids: &[Uuid], logs: &[HabitLog]) -> BTreeSet<NaiveDate> {
    if habit_ids.is_empty() {
        return BTreeSet::new();
    }

    let wanted: HashSet<Uuid> = habit_ids.iter().copied().collect();
    let mut per_day: HashMap<NaiveDate, HashSet<Uuid>> = HashMap::new();
    for log in logs {
        if log.completed && wanted.contains(&log.habit_id) {
            per_day.entry(log.log_date).or_default().insert(log.habit_id);
        }
    }

    per_day
        .into_iter()
        .filter(|(_, done)| done.len() == wanted.len())
        .map(|(day, _)| day)
        .collect()
}

/// Run of consecutive days ending today, or ending yesterday when today is
/// not done yet.
pub fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let yesterday = today - Duration::days(1);
    let mut check = if days.contains(&today) {
        today
    } else if days.contains(&yesterday) {
        yesterday
    } else {
        return 0;
    };

    let mut streak = 0;
    while days.contains(&check) {
        streak += 1;
        check -= Duration::days(1);
    }
    streak
}

/// Longest run of consecutive days anywhere in the set.
pub fn best_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut best = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;

    for &day in days {
        run = match prev {
            Some(p) if day == p + Duration::days(1) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(day);
    }
    best
}

pub fn habit_stats(habit: &Habit, logs: &[HabitLog], today: NaiveDate) -> HabitStats {
    let days = completed_days(logs);
    let total_days = logs.len() as i64;
    let completed = days.len() as i64;
    let completion_rate = if total_days > 0 {
        (completed as f64 / total_days as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };

    HabitStats {
        habit_id: habit.id,
        habit_name: habit.name.clone(),
        total_days,
        completed_days: completed,
        completion_rate,
        current_streak: current_streak(&days, today),
        best_streak: best_streak(&days),
        last_completed_on: days.iter().next_back().copied(),
    }
}

// ── Repository-backed queries ────────────────────────────────────────────

async fn window_days(
    repo: &dyn Repository,
    user_id: Uuid,
    habits: &[Habit],
    today: NaiveDate,
) -> AppResult<BTreeSet<NaiveDate>> {
    if habits.is_empty() {
        return Ok(BTreeSet::new());
    }

    // One extra day so a yesterday-anchored run of full window length fits.
    let from = today - Duration::days(STREAK_WINDOW_DAYS);
    let logs = repo.list_logs_for_user_between(user_id, from, today).await?;
    let ids: Vec<Uuid> = habits.iter().map(|h| h.id).collect();
    Ok(fully_completed_days(&ids, &logs))
}

/// Cross-habit current streak over the user's active habits.
pub async fn overall_streak(
    repo: &dyn Repository,
    user_id: Uuid,
    today: NaiveDate,
) -> AppResult<u32> {
    let habits = repo.list_active_habits(user_id).await?;
    let days = window_days(repo, user_id, &habits, today).await?;
    Ok(current_streak(&days, today))
}

pub async fn stats_for_habit(
    repo: &dyn Repository,
    habit: &Habit,
    today: NaiveDate,
) -> AppResult<HabitStats> {
    let logs = repo.list_logs_for_habit(habit.id).await?;
    Ok(habit_stats(habit, &logs, today))
}

pub async fn user_stats(
    repo: &dyn Repository,
    user_id: Uuid,
    today: NaiveDate,
) -> AppResult<UserStats> {
    let habits = repo.list_active_habits(user_id).await?;

    let mut per_habit = Vec::with_capacity(habits.len());
    for habit in &habits {
        per_habit.push(stats_for_habit(repo, habit, today).await?);
    }

    let days = window_days(repo, user_id, &habits, today).await?;

    Ok(UserStats {
        habits: per_habit,
        overall_streak: current_streak(&days, today),
        best_overall_streak: best_streak(&days),
    })
}
