use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::ledger::UserId;

/// Per-user subscription expiry, renewed on each confirmed payment.
///
/// Renewal extends from whichever is later, now or the current expiry, so
/// paying early never loses remaining time.
#[derive(Default)]
pub struct SubscriptionBook {
    expiries: Mutex<HashMap<UserId, DateTime<Utc>>>,
}

impl SubscriptionBook {
    pub async fn extend(&self, user: UserId, period: Duration) -> DateTime<Utc> {
        let now = Utc::now();
        let mut expiries = self.expiries.lock().await;
        let base = expiries.get(&user).copied().map_or(now, |current| current.max(now));
        let expires_at = base + period;
        expiries.insert(user, expires_at);
        expires_at
    }

    pub async fn expires_at(&self, user: UserId) -> Option<DateTime<Utc>> {
        let expiries = self.expiries.lock().await;
        expiries.get(&user).copied()
    }

    pub async fn is_active(&self, user: UserId) -> bool {
        self.is_active_at(user, Utc::now()).await
    }

    pub async fn is_active_at(&self, user: UserId, now: DateTime<Utc>) -> bool {
        let expiries = self.expiries.lock().await;
        expiries.get(&user).is_some_and(|expiry| *expiry > now)
    }
}
