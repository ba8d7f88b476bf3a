//! Storage capability consumed by the core services.
//!
//! Compound writes (`unlock_achievement`, `apply_referral_stage1`,
//! `apply_referral_stage2`, `confirm_payment`) are insert-or-no-op units: the
//! idempotency row and the subscription grants it pays for either land
//! together or not at all. A `false`/`None` result means another event got
//! there first; it is never an error.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::achievement::{Achievement, TierConfig};
use crate::models::ad::Ad;
use crate::models::habit::{Habit, NewHabit};
use crate::models::habit_log::{HabitLog, LogEntry};
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::referral::{Referral, ReferralCounts, Stage1Applied, Stage1Grant};
use crate::models::user::{NewUser, User};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgRepository;

#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn ping(&self) -> AppResult<()>;

    // ── Users ────────────────────────────────────────────────────────────

    /// Insert by external id, or refresh the profile fields of an existing
    /// user. The referral code is only written on insert. Returns
    /// `(user, is_new)`.
    async fn upsert_user(&self, user: &NewUser) -> AppResult<(User, bool)>;
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn get_user_by_external_id(&self, external_id: i64) -> AppResult<Option<User>>;
    async fn get_user_by_referral_code(&self, code: &str) -> AppResult<Option<User>>;
    /// Stacks on an active subscription, restarts from `now` otherwise.
    /// Returns the new expiry.
    async fn add_subscription_days(
        &self,
        user_id: Uuid,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>>;
    async fn set_subscription_expiry(&self, user_id: Uuid, expires_at: DateTime<Utc>)
        -> AppResult<()>;
    /// `min(current + percent, cap)`. Returns the new total.
    async fn add_discount(&self, user_id: Uuid, percent: i32, cap: i32) -> AppResult<i32>;
    async fn increment_action_count(&self, user_id: Uuid) -> AppResult<i32>;
    async fn reset_action_count(&self, user_id: Uuid) -> AppResult<()>;

    // ── Habits ───────────────────────────────────────────────────────────

    async fn create_habit(&self, habit: &NewHabit) -> AppResult<Habit>;
    async fn get_habit(&self, id: Uuid) -> AppResult<Option<Habit>>;
    async fn list_active_habits(&self, user_id: Uuid) -> AppResult<Vec<Habit>>;
    async fn count_active_habits(&self, user_id: Uuid) -> AppResult<i64>;
    /// Soft delete. Logs stay attributable.
    async fn deactivate_habit(&self, id: Uuid) -> AppResult<()>;

    // ── Habit logs ───────────────────────────────────────────────────────

    async fn upsert_log(&self, entry: &LogEntry) -> AppResult<HabitLog>;
    async fn list_logs_for_user_on(&self, user_id: Uuid, day: NaiveDate)
        -> AppResult<Vec<HabitLog>>;
    async fn list_logs_for_user_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HabitLog>>;
    async fn list_logs_for_habit(&self, habit_id: Uuid) -> AppResult<Vec<HabitLog>>;

    // ── Achievements ─────────────────────────────────────────────────────

    /// Create-if-absent on (user, tier); grants the tier's bonus days only
    /// when the row was actually inserted.
    async fn unlock_achievement(
        &self,
        user_id: Uuid,
        tier: &TierConfig,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;
    async fn list_achievements(&self, user_id: Uuid) -> AppResult<Vec<Achievement>>;

    // ── Referrals ────────────────────────────────────────────────────────

    /// Create-if-absent on the referred user with stage 1 already applied,
    /// then pay out the grant. Days mode while the referrer has fewer than
    /// `bonus_limit` day-paying referrals, discount mode after that. The count
    /// and the choice happen in the same unit as the insert, serialized per
    /// referrer. `None` when the referred user already had a referral row.
    async fn apply_referral_stage1(
        &self,
        grant: &Stage1Grant,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Stage1Applied>>;
    async fn get_referral_by_referred(&self, referred_id: Uuid) -> AppResult<Option<Referral>>;
    async fn list_referrals_by_referrer(&self, referrer_id: Uuid) -> AppResult<Vec<Referral>>;
    async fn get_pending_stage2_referral(&self, referred_id: Uuid)
        -> AppResult<Option<Referral>>;
    /// Marks stage 2 applied and grants `bonus_days` to both parties.
    /// `None` when the referral is no longer pending (already applied or in
    /// discount mode).
    async fn apply_referral_stage2(
        &self,
        referral_id: Uuid,
        bonus_days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Referral>>;
    async fn referral_counts(&self, referrer_id: Uuid) -> AppResult<ReferralCounts>;

    // ── Payments ─────────────────────────────────────────────────────────

    async fn create_payment(&self, payment: &NewPayment) -> AppResult<Payment>;
    async fn get_payment_by_order_id(&self, order_id: &str) -> AppResult<Option<Payment>>;
    async fn update_payment_status(
        &self,
        order_id: &str,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
    ) -> AppResult<()>;
    /// Sets `paid_at` if still unset and grants `days` to the payer.
    /// `None` when the payment was already paid.
    async fn confirm_payment(
        &self,
        order_id: &str,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Payment>>;
    async fn get_pending_payment(&self, user_id: Uuid) -> AppResult<Option<Payment>>;

    // ── Ads ──────────────────────────────────────────────────────────────

    async fn list_running_ads(&self, now: DateTime<Utc>) -> AppResult<Vec<Ad>>;
    async fn record_ad_view(&self, ad_id: Uuid) -> AppResult<()>;
    async fn record_ad_click(&self, ad_id: Uuid) -> AppResult<bool>;
}
