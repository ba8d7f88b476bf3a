use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::Repository;
use crate::error::{AppError, AppResult};
use crate::models::achievement::{Achievement, TierConfig};
use crate::models::ad::Ad;
use crate::models::habit::{Habit, NewHabit};
use crate::models::habit_log::{HabitLog, LogEntry};
use crate::models::payment::{NewPayment, Payment, PaymentStatus};
use crate::models::referral::{
    Referral, ReferralCounts, ReferrerReward, Stage1Applied, Stage1Grant,
};
use crate::models::user::{NewUser, User};

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct UpsertedUser {
    #[sqlx(flatten)]
    user: User,
    inserted: bool,
}

// Expired and missing subscriptions restart from `now`; active ones stack.
const ADD_DAYS_SQL: &str = r#"
    UPDATE users SET
        subscription_expires_at = CASE
            WHEN subscription_expires_at IS NULL OR subscription_expires_at <= $3
                THEN $3 + make_interval(days => $2)
            ELSE subscription_expires_at + make_interval(days => $2)
        END,
        updated_at = NOW()
    WHERE id = $1
    RETURNING subscription_expires_at
"#;

async fn grant_days(
    conn: &mut PgConnection,
    user_id: Uuid,
    days: i32,
    now: DateTime<Utc>,
) -> AppResult<DateTime<Utc>> {
    sqlx::query_scalar::<_, Option<DateTime<Utc>>>(ADD_DAYS_SQL)
        .bind(user_id)
        .bind(days)
        .bind(now)
        .fetch_optional(&mut *conn)
        .await?
        .flatten()
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

async fn bump_discount(
    conn: &mut PgConnection,
    user_id: Uuid,
    percent: i32,
    cap: i32,
) -> AppResult<i32> {
    sqlx::query_scalar::<_, i32>(
        r#"
        UPDATE users SET
            discount_percent = LEAST(discount_percent + $2, $3),
            updated_at = NOW()
        WHERE id = $1
        RETURNING discount_percent
        "#,
    )
    .bind(user_id)
    .bind(percent)
    .bind(cap)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))
}

#[async_trait]
impl Repository for PgRepository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &NewUser) -> AppResult<(User, bool)> {
        let row = sqlx::query_as::<_, UpsertedUser>(
            r#"
            INSERT INTO users (id, external_id, username, display_name, timezone, referral_code)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_id) DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                updated_at = NOW()
            RETURNING *, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.external_id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.timezone)
        .bind(&user.referral_code)
        .fetch_one(&self.pool)
        .await?;

        Ok((row.user, row.inserted))
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_external_id(&self, external_id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_referral_code(&self, code: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn add_subscription_days(
        &self,
        user_id: Uuid,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        let mut conn = self.pool.acquire().await?;
        grant_days(&mut conn, user_id, days, now).await
    }

    async fn set_subscription_expiry(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET subscription_expires_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".into()));
        }
        Ok(())
    }

    async fn add_discount(&self, user_id: Uuid, percent: i32, cap: i32) -> AppResult<i32> {
        let mut conn = self.pool.acquire().await?;
        bump_discount(&mut conn, user_id, percent, cap).await
    }

    async fn increment_action_count(&self, user_id: Uuid) -> AppResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE users SET action_count = action_count + 1 WHERE id = $1 RETURNING action_count",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    async fn reset_action_count(&self, user_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE users SET action_count = 0 WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Habits ───────────────────────────────────────────────────────────

    async fn create_habit(&self, habit: &NewHabit) -> AppResult<Habit> {
        let habit = sqlx::query_as::<_, Habit>(
            r#"
            INSERT INTO habits (id, user_id, name, description, frequency, reminder_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(habit.user_id)
        .bind(&habit.name)
        .bind(&habit.description)
        .bind(habit.frequency)
        .bind(habit.reminder_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(habit)
    }

    async fn get_habit(&self, id: Uuid) -> AppResult<Option<Habit>> {
        let habit = sqlx::query_as::<_, Habit>("SELECT * FROM habits WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(habit)
    }

    async fn list_active_habits(&self, user_id: Uuid) -> AppResult<Vec<Habit>> {
        let habits = sqlx::query_as::<_, Habit>(
            r#"
            SELECT * FROM habits
            WHERE user_id = $1 AND is_active = true
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(habits)
    }

    async fn count_active_habits(&self, user_id: Uuid) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM habits WHERE user_id = $1 AND is_active = true",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn deactivate_habit(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE habits SET is_active = false, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Habit logs ───────────────────────────────────────────────────────

    async fn upsert_log(&self, entry: &LogEntry) -> AppResult<HabitLog> {
        let log = sqlx::query_as::<_, HabitLog>(
            r#"
            INSERT INTO habit_logs (id, habit_id, user_id, log_date, completed, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (habit_id, log_date) DO UPDATE SET
                completed = EXCLUDED.completed,
                note = EXCLUDED.note
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.habit_id)
        .bind(entry.user_id)
        .bind(entry.log_date)
        .bind(entry.completed)
        .bind(&entry.note)
        .fetch_one(&self.pool)
        .await?;
        Ok(log)
    }

    async fn list_logs_for_user_on(
        &self,
        user_id: Uuid,
        day: NaiveDate,
    ) -> AppResult<Vec<HabitLog>> {
        let logs = sqlx::query_as::<_, HabitLog>(
            "SELECT * FROM habit_logs WHERE user_id = $1 AND log_date = $2",
        )
        .bind(user_id)
        .bind(day)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn list_logs_for_user_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HabitLog>> {
        let logs = sqlx::query_as::<_, HabitLog>(
            r#"
            SELECT * FROM habit_logs
            WHERE user_id = $1 AND log_date BETWEEN $2 AND $3
            ORDER BY log_date DESC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    async fn list_logs_for_habit(&self, habit_id: Uuid) -> AppResult<Vec<HabitLog>> {
        let logs = sqlx::query_as::<_, HabitLog>(
            "SELECT * FROM habit_logs WHERE habit_id = $1 ORDER BY log_date ASC",
        )
        .bind(habit_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    // ── Achievements ─────────────────────────────────────────────────────

    async fn unlock_achievement(
        &self,
        user_id: Uuid,
        tier: &TierConfig,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO achievements (id, user_id, tier, streak_days, bonus_days, unlocked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, tier) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tier.tier)
        .bind(tier.streak_days as i32)
        .bind(tier.bonus_days)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            return Ok(false);
        }

        if tier.bonus_days > 0 {
            grant_days(&mut tx, user_id, tier.bonus_days, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_achievements(&self, user_id: Uuid) -> AppResult<Vec<Achievement>> {
        let achievements = sqlx::query_as::<_, Achievement>(
            "SELECT * FROM achievements WHERE user_id = $1 ORDER BY streak_days ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(achievements)
    }

    // ── Referrals ────────────────────────────────────────────────────────

    async fn apply_referral_stage1(
        &self,
        grant: &Stage1Grant,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Stage1Applied>> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the referrer serializes concurrent stage 1 writes for
        // the same referrer until commit.
        let discount_before = sqlx::query_scalar::<_, i32>(
            "SELECT discount_percent FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(grant.referrer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Referrer not found".into()))?;

        let bonus_referrals = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = $1 AND gave_discount = false",
        )
        .bind(grant.referrer_id)
        .fetch_one(&mut *tx)
        .await?;
        let gave_discount = bonus_referrals >= grant.bonus_limit;
        let referrer_days = if gave_discount { 0 } else { grant.bonus_days };

        let referral = sqlx::query_as::<_, Referral>(
            r#"
            INSERT INTO referrals (
                id, referrer_id, referred_id, referral_code,
                stage1_applied, stage1_bonus_days, gave_discount
            )
            VALUES ($1, $2, $3, $4, true, $5, $6)
            ON CONFLICT (referred_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(grant.referrer_id)
        .bind(grant.referred_id)
        .bind(&grant.referral_code)
        .bind(referrer_days)
        .bind(gave_discount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(referral) = referral else {
            return Ok(None);
        };

        sqlx::query("UPDATE users SET referred_by = $2, updated_at = NOW() WHERE id = $1")
            .bind(grant.referred_id)
            .bind(grant.referrer_id)
            .execute(&mut *tx)
            .await?;

        grant_days(&mut tx, grant.referred_id, grant.bonus_days, now).await?;
        let referrer_reward = if gave_discount {
            let discount_after = bump_discount(
                &mut tx,
                grant.referrer_id,
                grant.discount_step,
                grant.discount_cap,
            )
            .await?;
            ReferrerReward::Discount {
                added_percent: (discount_after - discount_before).max(0),
            }
        } else {
            grant_days(&mut tx, grant.referrer_id, referrer_days, now).await?;
            ReferrerReward::Days {
                days: referrer_days,
            }
        };

        tx.commit().await?;
        Ok(Some(Stage1Applied {
            referral,
            referrer_reward,
        }))
    }

    async fn get_referral_by_referred(&self, referred_id: Uuid) -> AppResult<Option<Referral>> {
        let referral =
            sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE referred_id = $1")
                .bind(referred_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(referral)
    }

    async fn list_referrals_by_referrer(&self, referrer_id: Uuid) -> AppResult<Vec<Referral>> {
        let referrals = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(referrals)
    }

    async fn get_pending_stage2_referral(
        &self,
        referred_id: Uuid,
    ) -> AppResult<Option<Referral>> {
        let referral = sqlx::query_as::<_, Referral>(
            r#"
            SELECT * FROM referrals
            WHERE referred_id = $1
              AND stage1_applied = true
              AND stage2_applied = false
              AND gave_discount = false
            "#,
        )
        .bind(referred_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(referral)
    }

    async fn apply_referral_stage2(
        &self,
        referral_id: Uuid,
        bonus_days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Referral>> {
        let mut tx = self.pool.begin().await?;

        let referral = sqlx::query_as::<_, Referral>(
            r#"
            UPDATE referrals SET
                stage2_applied = true,
                stage2_bonus_days = $2,
                updated_at = NOW()
            WHERE id = $1
              AND stage1_applied = true
              AND stage2_applied = false
              AND gave_discount = false
            RETURNING *
            "#,
        )
        .bind(referral_id)
        .bind(bonus_days)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(referral) = referral else {
            return Ok(None);
        };

        grant_days(&mut tx, referral.referrer_id, bonus_days, now).await?;
        grant_days(&mut tx, referral.referred_id, bonus_days, now).await?;

        tx.commit().await?;
        Ok(Some(referral))
    }

    async fn referral_counts(&self, referrer_id: Uuid) -> AppResult<ReferralCounts> {
        let counts = sqlx::query_as::<_, ReferralCounts>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE gave_discount = false) AS bonus,
                COUNT(*) FILTER (WHERE gave_discount = true) AS discount,
                COUNT(*) FILTER (WHERE stage1_applied = true) AS stage1_completed,
                COUNT(*) FILTER (WHERE stage2_applied = true) AS stage2_completed,
                COALESCE(SUM(stage1_bonus_days + stage2_bonus_days), 0)::BIGINT AS total_bonus_days
            FROM referrals
            WHERE referrer_id = $1
            "#,
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    // ── Payments ─────────────────────────────────────────────────────────

    async fn create_payment(&self, payment: &NewPayment) -> AppResult<Payment> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                id, user_id, gateway_payment_id, order_id, amount, original_amount,
                discount_percent, status, payment_url, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.user_id)
        .bind(&payment.gateway_payment_id)
        .bind(&payment.order_id)
        .bind(payment.amount)
        .bind(payment.original_amount)
        .bind(payment.discount_percent)
        .bind(payment.status)
        .bind(&payment.payment_url)
        .bind(&payment.description)
        .fetch_one(&self.pool)
        .await?;
        Ok(payment)
    }

    async fn get_payment_by_order_id(&self, order_id: &str) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn update_payment_status(
        &self,
        order_id: &str,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                gateway_payment_id = COALESCE($3, gateway_payment_id),
                updated_at = NOW()
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(gateway_payment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn confirm_payment(
        &self,
        order_id: &str,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET
                status = 'confirmed',
                paid_at = $2,
                updated_at = NOW()
            WHERE order_id = $1 AND paid_at IS NULL
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(payment) = payment else {
            return Ok(None);
        };

        grant_days(&mut tx, payment.user_id, days, now).await?;

        tx.commit().await?;
        Ok(Some(payment))
    }

    async fn get_pending_payment(&self, user_id: Uuid) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments
            WHERE user_id = $1 AND status IN ('new', 'pending')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payment)
    }

    // ── Ads ──────────────────────────────────────────────────────────────

    async fn list_running_ads(&self, now: DateTime<Utc>) -> AppResult<Vec<Ad>> {
        let ads = sqlx::query_as::<_, Ad>(
            r#"
            SELECT * FROM ads
            WHERE is_active = true
              AND (starts_at IS NULL OR starts_at <= $1)
              AND (ends_at IS NULL OR ends_at >= $1)
            ORDER BY priority DESC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ads)
    }

    async fn record_ad_view(&self, ad_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE ads SET views_count = views_count + 1 WHERE id = $1")
            .bind(ad_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_ad_click(&self, ad_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("UPDATE ads SET clicks_count = clicks_count + 1 WHERE id = $1")
            .bind(ad_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
