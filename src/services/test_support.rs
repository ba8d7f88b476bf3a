//! Fixtures shared by the service tests.

use chrono::{Duration, NaiveDate};

use crate::models::habit::{Habit, HabitFrequency, NewHabit};
use crate::models::user::{generate_referral_code, NewUser, User, DEFAULT_TIMEZONE};
use crate::repository::memory::MemoryRepository;
use crate::repository::Repository;

pub async fn register(repo: &MemoryRepository, external_id: i64) -> User {
    let (user, _) = repo
        .upsert_user(&NewUser {
            external_id,
            username: Some(format!("user{external_id}")),
            display_name: format!("User {external_id}"),
            timezone: DEFAULT_TIMEZONE.into(),
            referral_code: generate_referral_code(),
        })
        .await
        .unwrap();
    user
}

pub async fn habit(repo: &MemoryRepository, user: &User) -> Habit {
    repo.create_habit(&NewHabit {
        user_id: user.id,
        name: "Stretch".into(),
        description: None,
        frequency: HabitFrequency::Daily,
        reminder_time: None,
    })
    .await
    .unwrap()
}

/// Completes `habit` on the `days` days ending today.
pub async fn seed_streak(repo: &MemoryRepository, habit: &Habit, today: NaiveDate, days: u32) {
    let dates: Vec<NaiveDate> = (0..i64::from(days))
        .map(|offset| today - Duration::days(offset))
        .collect();
    repo.seed_completions(habit.id, &dates).await;
}
