pub mod ads;
pub mod habits;
pub mod health;
pub mod payments;
pub mod progress;
pub mod session;
pub mod subscription;
pub mod users;
pub mod ws;

use crate::error::{AppError, AppResult};
use crate::models::user::User;
use crate::AppState;

/// Users are addressed by their chat id in every path.
pub(crate) async fn load_user(state: &AppState, external_id: i64) -> AppResult<User> {
    state
        .repo
        .get_user_by_external_id(external_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}
