use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::Repository;

/// Grants stack on an active subscription and restart from `now` otherwise.
pub async fn add_days(
    repo: &dyn Repository,
    user_id: Uuid,
    days: i32,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    if days < 0 {
        return Err(AppError::Validation("days must not be negative".into()));
    }

    let expires_at = repo.add_subscription_days(user_id, days, now).await?;
    tracing::info!(user_id = %user_id, days, expires_at = %expires_at, "Subscription extended");
    Ok(expires_at)
}

pub async fn set_expiry(
    repo: &dyn Repository,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> AppResult<()> {
    repo.set_subscription_expiry(user_id, expires_at).await?;
    tracing::info!(user_id = %user_id, expires_at = %expires_at, "Subscription expiry set");
    Ok(())
}

pub async fn is_active(repo: &dyn Repository, user_id: Uuid, now: DateTime<Utc>) -> AppResult<bool> {
    let user = repo
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(user.has_active_subscription(now))
}
