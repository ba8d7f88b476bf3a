use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, ProgressEvent};
use crate::models::payment::{discounted_price, NewPayment, Payment, PaymentStatus};
use crate::models::user::User;
use crate::repository::Repository;
use crate::services::tinkoff::{GatewayResponse, Notification};

/// Acquiring capability. `TinkoffClient` is the production implementation.
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn init(
        &self,
        order_id: &str,
        amount: i64,
        description: &str,
        external_id: i64,
    ) -> AppResult<GatewayResponse>;

    async fn get_state(&self, payment_id: &str) -> AppResult<GatewayResponse>;

    fn verify_notification(&self, notification: &Notification) -> bool;
}

/// Opens an order for one subscription period at the user's referral
/// discount. The discount is not consumed by paying.
pub async fn create(
    repo: &dyn Repository,
    gateway: &dyn PaymentGateway,
    config: &Config,
    user: &User,
) -> AppResult<Payment> {
    let discount = user.discount_percent.clamp(0, 100);
    let amount = discounted_price(config.subscription_price, discount);
    let order_id = Uuid::new_v4().to_string();
    let description = format!("Premium subscription, {} days", config.subscription_days);

    let response = gateway
        .init(&order_id, amount, &description, user.external_id)
        .await?;

    let payment = repo
        .create_payment(&NewPayment {
            user_id: user.id,
            gateway_payment_id: Some(response.payment_id).filter(|id| !id.is_empty()),
            order_id,
            amount,
            original_amount: config.subscription_price,
            discount_percent: discount,
            status: PaymentStatus::from_gateway(&response.status),
            payment_url: response.payment_url,
            description,
        })
        .await?;

    tracing::info!(
        user_id = %user.id,
        order_id = %payment.order_id,
        amount,
        discount,
        "Payment created"
    );
    Ok(payment)
}

pub async fn pending(repo: &dyn Repository, user_id: Uuid) -> AppResult<Option<Payment>> {
    repo.get_pending_payment(user_id).await
}

/// Gateway webhook. Nothing is touched unless the token checks out.
pub async fn process_notification(
    repo: &dyn Repository,
    gateway: &dyn PaymentGateway,
    events: &EventBus,
    config: &Config,
    notification: &Notification,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    if !gateway.verify_notification(notification) {
        tracing::warn!(order_id = %notification.order_id, "Rejected notification with bad token");
        return Err(AppError::InvalidSignature);
    }

    let payment = repo
        .get_payment_by_order_id(&notification.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

    let status = PaymentStatus::from_gateway(&notification.status);
    let gateway_id = Some(notification.payment_id.as_str()).filter(|id| !id.is_empty());
    apply_status(repo, events, config, &payment, status, gateway_id, now).await
}

/// Manual poll through `GetState`, for when the webhook never arrived.
pub async fn refresh_status(
    repo: &dyn Repository,
    gateway: &dyn PaymentGateway,
    events: &EventBus,
    config: &Config,
    order_id: &str,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    let payment = repo
        .get_payment_by_order_id(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))?;

    if payment.paid_at.is_some() {
        return Ok(payment);
    }

    let gateway_id = payment
        .gateway_payment_id
        .clone()
        .ok_or_else(|| AppError::Validation("Payment has no gateway id yet".into()))?;

    let state = gateway.get_state(&gateway_id).await?;
    let status = PaymentStatus::from_gateway(&state.status);
    apply_status(repo, events, config, &payment, status, None, now).await
}

async fn apply_status(
    repo: &dyn Repository,
    events: &EventBus,
    config: &Config,
    payment: &Payment,
    status: PaymentStatus,
    gateway_id: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<Payment> {
    // A late intermediate status must not reopen a paid order.
    if payment.paid_at.is_some() && status.is_open() {
        tracing::debug!(order_id = %payment.order_id, ?status, "Ignoring stale status");
        return Ok(payment.clone());
    }

    repo.update_payment_status(&payment.order_id, status, gateway_id)
        .await?;

    if status == PaymentStatus::Confirmed {
        match repo
            .confirm_payment(&payment.order_id, config.subscription_days, now)
            .await?
        {
            Some(paid) => {
                let expires_at = repo
                    .get_user(paid.user_id)
                    .await?
                    .and_then(|u| u.subscription_expires_at)
                    .unwrap_or(now);
                tracing::info!(
                    user_id = %paid.user_id,
                    order_id = %paid.order_id,
                    expires_at = %expires_at,
                    "Payment confirmed"
                );
                events.publish(ProgressEvent::PaymentConfirmed {
                    user_id: paid.user_id,
                    order_id: paid.order_id.clone(),
                    expires_at,
                });
                return Ok(paid);
            }
            None => {
                tracing::debug!(order_id = %payment.order_id, "Payment already confirmed");
            }
        }
    } else {
        tracing::info!(order_id = %payment.order_id, ?status, "Payment status updated");
    }

    repo.get_payment_by_order_id(&payment.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found".into()))
}
