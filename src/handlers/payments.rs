use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::error::{AppError, AppResult};
use crate::handlers::load_user;
use crate::models::payment::PaymentView;
use crate::services::payments;
use crate::services::tinkoff::Notification;
use crate::AppState;

pub async fn create_payment(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<(StatusCode, Json<PaymentView>)> {
    if !state.config.tinkoff_configured() {
        return Err(AppError::Gateway("Tinkoff credentials are not configured".into()));
    }

    let user = load_user(&state, external_id).await?;
    let payment = payments::create(
        state.repo.as_ref(),
        state.gateway.as_ref(),
        &state.config,
        &user,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(payment.into())))
}

pub async fn get_pending_payment(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> AppResult<Json<Option<PaymentView>>> {
    let user = load_user(&state, external_id).await?;
    let payment = payments::pending(state.repo.as_ref(), user.id).await?;
    Ok(Json(payment.map(PaymentView::from)))
}

pub async fn refresh_payment(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> AppResult<Json<PaymentView>> {
    let payment = payments::refresh_status(
        state.repo.as_ref(),
        state.gateway.as_ref(),
        &state.events,
        &state.config,
        &order_id,
        state.clock.now(),
    )
    .await?;

    Ok(Json(payment.into()))
}

/// Tinkoff notification endpoint. The gateway keeps retrying until it gets a
/// plain `OK` body.
pub async fn webhook(
    State(state): State<AppState>,
    Json(notification): Json<Notification>,
) -> AppResult<&'static str> {
    tracing::info!(
        order_id = %notification.order_id,
        status = %notification.status,
        "Payment notification received"
    );

    payments::process_notification(
        state.repo.as_ref(),
        state.gateway.as_ref(),
        &state.events,
        &state.config,
        &notification,
        state.clock.now(),
    )
    .await?;

    Ok("OK")
}
