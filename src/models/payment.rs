use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const SUBSCRIPTION_DAYS: i32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub gateway_payment_id: Option<String>,
    pub order_id: String,
    pub amount: i64,
    pub original_amount: i64,
    pub discount_percent: i32,
    pub status: PaymentStatus,
    pub payment_url: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, together with the subscription grant.
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    New,
    Pending,
    Confirmed,
    Canceled,
    Rejected,
    Refunded,
}

impl PaymentStatus {
    /// Maps an acquiring status string onto the fixed state set.
    /// Intermediate gateway states (FORM_SHOWED, AUTHORIZED, ...) count as pending.
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "NEW" => Self::New,
            "CONFIRMED" => Self::Confirmed,
            "CANCELED" | "DEADLINE_EXPIRED" | "REVERSED" | "PARTIAL_REVERSED" => Self::Canceled,
            "REJECTED" | "AUTH_FAIL" => Self::Rejected,
            "REFUNDED" | "PARTIAL_REFUNDED" => Self::Refunded,
            _ => Self::Pending,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub gateway_payment_id: Option<String>,
    pub order_id: String,
    pub amount: i64,
    pub original_amount: i64,
    pub discount_percent: i32,
    pub status: PaymentStatus,
    pub payment_url: Option<String>,
    pub description: String,
}

/// `price * (100 - discount) / 100`, discount clamped to 0..=100.
pub fn discounted_price(price: i64, discount_percent: i32) -> i64 {
    if discount_percent <= 0 {
        return price;
    }
    let discount = i64::from(discount_percent.min(100));
    price * (100 - discount) / 100
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub order_id: String,
    pub status: PaymentStatus,
    pub amount: i64,
    pub original_amount: i64,
    pub discount_percent: i32,
    pub payment_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        Self {
            order_id: p.order_id,
            status: p.status,
            amount: p.amount,
            original_amount: p.original_amount,
            discount_percent: p.discount_percent,
            payment_url: p.payment_url,
            paid_at: p.paid_at,
        }
    }
}
