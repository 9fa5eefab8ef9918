use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::gifts::GiftAward;
use crate::ledger::UserId;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Channel to the privileged operator. Award notifications ride this on
/// every prize win; delivery is best effort and carries no transactional
/// guarantee.
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn award_won(&self, user_id: UserId, award: &GiftAward) -> Result<(), NotifyError>;
}

/// Detached send. Failures are logged, never propagated; the payment that
/// produced the award is already settled by the time this runs.
pub fn spawn_award_notification(
    notifier: Arc<dyn AdminNotifier>,
    user_id: UserId,
    award: GiftAward,
) {
    tokio::spawn(async move {
        if let Err(error) = notifier.award_won(user_id, &award).await {
            tracing::warn!(
                reason = %error,
                tracking_code = %award.tracking_code,
                "admin award notification failed"
            );
        }
    });
}

/// Recording notifier for local runs and tests.
#[derive(Default)]
pub struct MemoryAdminNotifier {
    notifications: Mutex<Vec<(UserId, GiftAward)>>,
    fail: AtomicBool,
}

pub fn memory() -> Arc<MemoryAdminNotifier> {
    Arc::new(MemoryAdminNotifier::default())
}

impl MemoryAdminNotifier {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub async fn notifications(&self) -> Vec<(UserId, GiftAward)> {
        let notifications = self.notifications.lock().await;
        notifications.clone()
    }
}

#[async_trait]
impl AdminNotifier for MemoryAdminNotifier {
    async fn award_won(&self, user_id: UserId, award: &GiftAward) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(NotifyError::Delivery("notifier disabled".to_string()));
        }
        let mut notifications = self.notifications.lock().await;
        notifications.push((user_id, award.clone()));
        Ok(())
    }
}
