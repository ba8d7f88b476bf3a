use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::AppState;

/// Conversation state is keyed by chat id alone; the user row may not exist
/// yet while the bot is still asking for the first answers.
pub async fn get_session(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Json<Value> {
    let session = state.sessions.get(external_id).await;
    Json(json!({ "state": session }))
}

pub async fn put_session(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.sessions.set(external_id, body).await;
    StatusCode::NO_CONTENT
}

pub async fn clear_session(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> StatusCode {
    if state.sessions.clear(external_id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
