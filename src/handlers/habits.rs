use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::load_user;
use crate::models::habit::{CreateHabitRequest, Habit, HabitWithStatus};
use crate::models::habit_log::HabitStats;
use crate::services::progress::{self, ProgressReport};
use crate::services::{habits, streak};
use crate::AppState;

pub async fn list_habits(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<Vec<HabitWithStatus>>> {
    let user = load_user(&state, external_id).await?;
    let habits = habits::list_with_status(state.repo.as_ref(), user.id, state.clock.today()).await?;
    Ok(Json(habits))
}

pub async fn create_habit(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(body): Json<CreateHabitRequest>,
) -> AppResult<(StatusCode, Json<Habit>)> {
    let user = load_user(&state, external_id).await?;
    let habit = habits::create(state.repo.as_ref(), &user, body, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(habit)))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    Path((external_id, habit_id)): Path<(i64, Uuid)>,
) -> AppResult<StatusCode> {
    let user = load_user(&state, external_id).await?;
    habits::delete(state.repo.as_ref(), user.id, habit_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete_habit(
    State(state): State<AppState>,
    Path((external_id, habit_id)): Path<(i64, Uuid)>,
) -> AppResult<Json<ProgressReport>> {
    set_completion(state, external_id, habit_id, true).await
}

pub async fn uncomplete_habit(
    State(state): State<AppState>,
    Path((external_id, habit_id)): Path<(i64, Uuid)>,
) -> AppResult<Json<ProgressReport>> {
    set_completion(state, external_id, habit_id, false).await
}

async fn set_completion(
    state: AppState,
    external_id: i64,
    habit_id: Uuid,
    completed: bool,
) -> AppResult<Json<ProgressReport>> {
    let user = load_user(&state, external_id).await?;
    let report = progress::record_completion(
        state.repo.as_ref(),
        state.clock.as_ref(),
        &state.events,
        &user,
        habit_id,
        completed,
    )
    .await?;
    Ok(Json(report))
}

pub async fn get_habit_stats(
    State(state): State<AppState>,
    Path((external_id, habit_id)): Path<(i64, Uuid)>,
) -> AppResult<Json<HabitStats>> {
    let user = load_user(&state, external_id).await?;
    let habit = habits::owned_habit(state.repo.as_ref(), user.id, habit_id).await?;
    let stats = streak::stats_for_habit(state.repo.as_ref(), &habit, state.clock.today()).await?;
    Ok(Json(stats))
}
