use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::ad::{Ad, AD_FREQUENCY};
use crate::models::user::User;
use crate::repository::Repository;

/// Ad cadence for free users plus a short-lived cache of running campaigns.
pub struct AdService {
    cache: RwLock<Option<CachedAds>>,
    ttl: Duration,
}

struct CachedAds {
    ads: Vec<Ad>,
    loaded_at: Instant,
}

impl AdService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(None),
            ttl,
        }
    }

    async fn running_ads(&self, repo: &dyn Repository, now: DateTime<Utc>) -> AppResult<Vec<Ad>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(cached.ads.iter().filter(|a| a.is_running(now)).cloned().collect());
                }
            }
        }

        let ads = repo.list_running_ads(now).await?;
        *self.cache.write().await = Some(CachedAds {
            ads: ads.clone(),
            loaded_at: Instant::now(),
        });
        tracing::debug!(count = ads.len(), "Ad cache refreshed");
        Ok(ads)
    }

    /// Counts one action for `user` and returns an ad when it is their turn.
    /// Premium users never see ads and are not counted.
    pub async fn next_ad(
        &self,
        repo: &dyn Repository,
        user: &User,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Ad>> {
        if user.has_active_subscription(now) {
            return Ok(None);
        }

        let count = repo.increment_action_count(user.id).await?;
        if count < AD_FREQUENCY {
            return Ok(None);
        }
        repo.reset_action_count(user.id).await?;

        let ads = self.running_ads(repo, now).await?;
        let picked = {
            let mut rng = rand::thread_rng();
            pick_weighted(&ads, &mut rng).cloned()
        };
        let Some(ad) = picked else {
            return Ok(None);
        };

        repo.record_ad_view(ad.id).await?;
        tracing::debug!(user_id = %user.id, ad_id = %ad.id, "Ad shown");
        Ok(Some(ad))
    }

    pub async fn record_click(&self, repo: &dyn Repository, ad_id: Uuid) -> AppResult<()> {
        if !repo.record_ad_click(ad_id).await? {
            return Err(AppError::NotFound("Ad not found".into()));
        }
        Ok(())
    }
}

/// Random pick with probability proportional to `priority + 1`.
pub fn pick_weighted<'a, R: Rng + ?Sized>(ads: &'a [Ad], rng: &mut R) -> Option<&'a Ad> {
    let total: u64 = ads.iter().map(|ad| u64::from(ad.weight())).sum();
    if total == 0 {
        return None;
    }

    let mut roll = rng.gen_range(0..total);
    for ad in ads {
        let weight = u64::from(ad.weight());
        if roll < weight {
            return Some(ad);
        }
        roll -= weight;
    }
    ads.last()
}
