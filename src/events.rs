use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::achievement::TierConfig;
use crate::models::referral::ReferralOutcome;

/// Notifications handed to the chat transport. The transport decides how to
/// render them; nothing here knows about messages or keyboards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    AchievementUnlocked {
        user_id: Uuid,
        achievement: TierConfig,
    },
    ReferralStageCompleted {
        #[serde(flatten)]
        outcome: ReferralOutcome,
    },
    ReferralUnlocked {
        user_id: Uuid,
    },
    PaymentConfirmed {
        user_id: Uuid,
        order_id: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No event subscribers connected");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}
