use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::Mutex;

/// Multi-step conversation state per chat user (e.g. "waiting for the habit
/// name"). Process-local; entries expire after `ttl` and the store never
/// holds more than `max_entries`.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<i64, SessionEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

struct SessionEntry {
    state: Value,
    touched_at: Instant,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub async fn get(&self, external_id: i64) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get(&external_id) {
            Some(entry) if now.duration_since(entry.touched_at) < self.ttl => {
                Some(entry.state.clone())
            }
            Some(_) => {
                entries.remove(&external_id);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, external_id: i64, state: Value) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if !entries.contains_key(&external_id) && entries.len() >= self.max_entries {
            // Evict the least recently touched entry
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched_at)
                .map(|(id, _)| *id)
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            external_id,
            SessionEntry {
                state,
                touched_at: now,
            },
        );
    }

    pub async fn clear(&self, external_id: i64) -> bool {
        self.entries.lock().await.remove(&external_id).is_some()
    }

    /// Drops expired entries. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.touched_at) < self.ttl);
        before - entries.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

pub fn spawn_session_cleanup_worker(sessions: SessionStore, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = sessions.cleanup().await;
            if purged > 0 {
                tracing::info!(purged, "Session cleanup: purged expired sessions");
            }
        }
    });
}
