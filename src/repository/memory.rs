use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
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

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    habits: HashMap<Uuid, Habit>,
    logs: HashMap<(Uuid, NaiveDate), HabitLog>,
    achievements: Vec<Achievement>,
    referrals: Vec<Referral>,
    payments: HashMap<String, Payment>,
    ads: Vec<Ad>,
}

impl State {
    fn user_mut(&mut self, id: Uuid) -> AppResult<&mut User> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    fn grant_days(&mut self, user_id: Uuid, days: i32, now: DateTime<Utc>) -> AppResult<DateTime<Utc>> {
        let user = self.user_mut(user_id)?;
        let base = match user.subscription_expires_at {
            Some(expires) if expires > now => expires,
            _ => now,
        };
        let expires = base + Duration::days(i64::from(days));
        user.subscription_expires_at = Some(expires);
        user.updated_at = now;
        Ok(expires)
    }

    fn bump_discount(&mut self, user_id: Uuid, percent: i32, cap: i32) -> AppResult<i32> {
        let user = self.user_mut(user_id)?;
        user.discount_percent = (user.discount_percent + percent).min(cap);
        Ok(user.discount_percent)
    }
}

/// Same contract as the Postgres repository, one mutex around everything.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    fail_log_reads: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_ad(&self, ad: Ad) {
        self.state.lock().await.ads.push(ad);
    }

    pub async fn ad(&self, id: Uuid) -> Option<Ad> {
        self.state.lock().await.ads.iter().find(|a| a.id == id).cloned()
    }

    /// Backdates completions without going through the services.
    pub async fn seed_completions(&self, habit_id: Uuid, days: &[NaiveDate]) {
        let mut state = self.state.lock().await;
        let Some(user_id) = state.habits.get(&habit_id).map(|h| h.user_id) else {
            return;
        };
        for &day in days {
            state.logs.insert(
                (habit_id, day),
                HabitLog {
                    id: Uuid::new_v4(),
                    habit_id,
                    user_id,
                    log_date: day,
                    completed: true,
                    note: None,
                    created_at: Utc::now(),
                },
            );
        }
    }

    /// Makes every log read fail, to exercise degraded paths.
    pub fn fail_log_reads(&self, fail: bool) {
        self.fail_log_reads.store(fail, Ordering::SeqCst);
    }

    fn check_log_reads(&self) -> AppResult<()> {
        if self.fail_log_reads.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn upsert_user(&self, new: &NewUser) -> AppResult<(User, bool)> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(user) = state
            .users
            .values_mut()
            .find(|u| u.external_id == new.external_id)
        {
            user.username = new.username.clone();
            user.display_name = new.display_name.clone();
            user.updated_at = now;
            return Ok((user.clone(), false));
        }

        let user = User {
            id: Uuid::new_v4(),
            external_id: new.external_id,
            username: new.username.clone(),
            display_name: new.display_name.clone(),
            subscription_expires_at: None,
            timezone: new.timezone.clone(),
            referral_code: new.referral_code.clone(),
            referred_by: None,
            discount_percent: 0,
            action_count: 0,
            broadcast_opt_in: true,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok((user, true))
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_external_id(&self, external_id: i64) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn get_user_by_referral_code(&self, code: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn add_subscription_days(
        &self,
        user_id: Uuid,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        self.state.lock().await.grant_days(user_id, days, now)
    }

    async fn set_subscription_expiry(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.user_mut(user_id)?.subscription_expires_at = Some(expires_at);
        Ok(())
    }

    async fn add_discount(&self, user_id: Uuid, percent: i32, cap: i32) -> AppResult<i32> {
        self.state.lock().await.bump_discount(user_id, percent, cap)
    }

    async fn increment_action_count(&self, user_id: Uuid) -> AppResult<i32> {
        let mut state = self.state.lock().await;
        let user = state.user_mut(user_id)?;
        user.action_count += 1;
        Ok(user.action_count)
    }

    async fn reset_action_count(&self, user_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.action_count = 0;
        }
        Ok(())
    }

    async fn create_habit(&self, new: &NewHabit) -> AppResult<Habit> {
        let now = Utc::now();
        let habit = Habit {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name.clone(),
            description: new.description.clone(),
            frequency: new.frequency,
            reminder_time: new.reminder_time,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .habits
            .insert(habit.id, habit.clone());
        Ok(habit)
    }

    async fn get_habit(&self, id: Uuid) -> AppResult<Option<Habit>> {
        Ok(self.state.lock().await.habits.get(&id).cloned())
    }

    async fn list_active_habits(&self, user_id: Uuid) -> AppResult<Vec<Habit>> {
        let state = self.state.lock().await;
        let mut habits: Vec<Habit> = state
            .habits
            .values()
            .filter(|h| h.user_id == user_id && h.is_active)
            .cloned()
            .collect();
        habits.sort_by_key(|h| h.created_at);
        Ok(habits)
    }

    async fn count_active_habits(&self, user_id: Uuid) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .habits
            .values()
            .filter(|h| h.user_id == user_id && h.is_active)
            .count() as i64)
    }

    async fn deactivate_habit(&self, id: Uuid) -> AppResult<()> {
        if let Some(habit) = self.state.lock().await.habits.get_mut(&id) {
            habit.is_active = false;
        }
        Ok(())
    }

    async fn upsert_log(&self, entry: &LogEntry) -> AppResult<HabitLog> {
        let mut state = self.state.lock().await;
        let log = state
            .logs
            .entry((entry.habit_id, entry.log_date))
            .and_modify(|log| {
                log.completed = entry.completed;
                log.note = entry.note.clone();
            })
            .or_insert_with(|| HabitLog {
                id: Uuid::new_v4(),
                habit_id: entry.habit_id,
                user_id: entry.user_id,
                log_date: entry.log_date,
                completed: entry.completed,
                note: entry.note.clone(),
                created_at: Utc::now(),
            });
        Ok(log.clone())
    }

    async fn list_logs_for_user_on(
        &self,
        user_id: Uuid,
        day: NaiveDate,
    ) -> AppResult<Vec<HabitLog>> {
        self.check_log_reads()?;
        let state = self.state.lock().await;
        Ok(state
            .logs
            .values()
            .filter(|l| l.user_id == user_id && l.log_date == day)
            .cloned()
            .collect())
    }

    async fn list_logs_for_user_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HabitLog>> {
        self.check_log_reads()?;
        let state = self.state.lock().await;
        let mut logs: Vec<HabitLog> = state
            .logs
            .values()
            .filter(|l| l.user_id == user_id && l.log_date >= from && l.log_date <= to)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.log_date.cmp(&a.log_date));
        Ok(logs)
    }

    async fn list_logs_for_habit(&self, habit_id: Uuid) -> AppResult<Vec<HabitLog>> {
        self.check_log_reads()?;
        let state = self.state.lock().await;
        let mut logs: Vec<HabitLog> = state
            .logs
            .values()
            .filter(|l| l.habit_id == habit_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.log_date);
        Ok(logs)
    }

    async fn unlock_achievement(
        &self,
        user_id: Uuid,
        tier: &TierConfig,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if state
            .achievements
            .iter()
            .any(|a| a.user_id == user_id && a.tier == tier.tier)
        {
            return Ok(false);
        }
        if tier.bonus_days > 0 {
            state.grant_days(user_id, tier.bonus_days, now)?;
        }
        state.achievements.push(Achievement {
            id: Uuid::new_v4(),
            user_id,
            tier: tier.tier,
            streak_days: tier.streak_days as i32,
            bonus_days: tier.bonus_days,
            unlocked_at: now,
        });
        Ok(true)
    }

    async fn list_achievements(&self, user_id: Uuid) -> AppResult<Vec<Achievement>> {
        let state = self.state.lock().await;
        let mut achievements: Vec<Achievement> = state
            .achievements
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        achievements.sort_by_key(|a| a.streak_days);
        Ok(achievements)
    }

    async fn apply_referral_stage1(
        &self,
        grant: &Stage1Grant,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Stage1Applied>> {
        let mut state = self.state.lock().await;
        if state
            .referrals
            .iter()
            .any(|r| r.referred_id == grant.referred_id)
        {
            return Ok(None);
        }
        // Validate both parties before mutating anything.
        let discount_before = state.user_mut(grant.referrer_id)?.discount_percent;
        state.user_mut(grant.referred_id)?.referred_by = Some(grant.referrer_id);

        let bonus_referrals = state
            .referrals
            .iter()
            .filter(|r| r.referrer_id == grant.referrer_id && !r.gave_discount)
            .count() as i64;
        let gave_discount = bonus_referrals >= grant.bonus_limit;
        let referrer_days = if gave_discount { 0 } else { grant.bonus_days };

        state.grant_days(grant.referred_id, grant.bonus_days, now)?;
        let referrer_reward = if gave_discount {
            let discount_after =
                state.bump_discount(grant.referrer_id, grant.discount_step, grant.discount_cap)?;
            ReferrerReward::Discount {
                added_percent: (discount_after - discount_before).max(0),
            }
        } else {
            state.grant_days(grant.referrer_id, referrer_days, now)?;
            ReferrerReward::Days {
                days: referrer_days,
            }
        };

        let referral = Referral {
            id: Uuid::new_v4(),
            referrer_id: grant.referrer_id,
            referred_id: grant.referred_id,
            referral_code: grant.referral_code.clone(),
            stage1_applied: true,
            stage1_bonus_days: referrer_days,
            stage2_applied: false,
            stage2_bonus_days: 0,
            gave_discount,
            created_at: now,
            updated_at: now,
        };
        state.referrals.push(referral.clone());
        Ok(Some(Stage1Applied {
            referral,
            referrer_reward,
        }))
    }

    async fn get_referral_by_referred(&self, referred_id: Uuid) -> AppResult<Option<Referral>> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .iter()
            .find(|r| r.referred_id == referred_id)
            .cloned())
    }

    async fn list_referrals_by_referrer(&self, referrer_id: Uuid) -> AppResult<Vec<Referral>> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .iter()
            .rev()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn get_pending_stage2_referral(
        &self,
        referred_id: Uuid,
    ) -> AppResult<Option<Referral>> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .iter()
            .find(|r| r.referred_id == referred_id && r.is_pending_stage2())
            .cloned())
    }

    async fn apply_referral_stage2(
        &self,
        referral_id: Uuid,
        bonus_days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Referral>> {
        let mut state = self.state.lock().await;
        let Some(idx) = state
            .referrals
            .iter()
            .position(|r| r.id == referral_id && r.is_pending_stage2())
        else {
            return Ok(None);
        };

        let (referrer_id, referred_id) = {
            let r = &state.referrals[idx];
            (r.referrer_id, r.referred_id)
        };
        state.grant_days(referrer_id, bonus_days, now)?;
        state.grant_days(referred_id, bonus_days, now)?;

        let referral = &mut state.referrals[idx];
        referral.stage2_applied = true;
        referral.stage2_bonus_days = bonus_days;
        referral.updated_at = now;
        Ok(Some(referral.clone()))
    }

    async fn referral_counts(&self, referrer_id: Uuid) -> AppResult<ReferralCounts> {
        let state = self.state.lock().await;
        let mut counts = ReferralCounts::default();
        for r in state.referrals.iter().filter(|r| r.referrer_id == referrer_id) {
            counts.total += 1;
            if r.gave_discount {
                counts.discount += 1;
            } else {
                counts.bonus += 1;
            }
            if r.stage1_applied {
                counts.stage1_completed += 1;
            }
            if r.stage2_applied {
                counts.stage2_completed += 1;
            }
            counts.total_bonus_days += i64::from(r.stage1_bonus_days + r.stage2_bonus_days);
        }
        Ok(counts)
    }

    async fn create_payment(&self, new: &NewPayment) -> AppResult<Payment> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            gateway_payment_id: new.gateway_payment_id.clone(),
            order_id: new.order_id.clone(),
            amount: new.amount,
            original_amount: new.original_amount,
            discount_percent: new.discount_percent,
            status: new.status,
            payment_url: new.payment_url.clone(),
            description: new.description.clone(),
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        self.state
            .lock()
            .await
            .payments
            .insert(payment.order_id.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_payment_by_order_id(&self, order_id: &str) -> AppResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(order_id).cloned())
    }

    async fn update_payment_status(
        &self,
        order_id: &str,
        status: PaymentStatus,
        gateway_payment_id: Option<&str>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(payment) = state.payments.get_mut(order_id) {
            payment.status = status;
            if let Some(id) = gateway_payment_id {
                payment.gateway_payment_id = Some(id.to_string());
            }
        }
        Ok(())
    }

    async fn confirm_payment(
        &self,
        order_id: &str,
        days: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Payment>> {
        let mut state = self.state.lock().await;
        let user_id = match state.payments.get(order_id) {
            Some(p) if p.paid_at.is_none() => p.user_id,
            _ => return Ok(None),
        };
        state.grant_days(user_id, days, now)?;

        let Some(payment) = state.payments.get_mut(order_id) else {
            return Ok(None);
        };
        payment.status = PaymentStatus::Confirmed;
        payment.paid_at = Some(now);
        payment.updated_at = now;
        Ok(Some(payment.clone()))
    }

    async fn get_pending_payment(&self, user_id: Uuid) -> AppResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| p.user_id == user_id && p.status.is_open())
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn list_running_ads(&self, now: DateTime<Utc>) -> AppResult<Vec<Ad>> {
        let state = self.state.lock().await;
        let mut ads: Vec<Ad> = state
            .ads
            .iter()
            .filter(|a| a.is_running(now))
            .cloned()
            .collect();
        ads.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(ads)
    }

    async fn record_ad_view(&self, ad_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(ad) = state.ads.iter_mut().find(|a| a.id == ad_id) {
            ad.views_count += 1;
        }
        Ok(())
    }

    async fn record_ad_click(&self, ad_id: Uuid) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.ads.iter_mut().find(|a| a.id == ad_id) {
            Some(ad) => {
                ad.clicks_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
