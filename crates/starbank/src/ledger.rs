use std::collections::HashMap;

use tokio::sync::Mutex;

/// Platform-assigned numeric user id. Users are owned by the messaging
/// platform; this crate only references them.
pub type UserId = u64;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: have {available}, need {needed}")]
    InsufficientBalance { available: u64, needed: u64 },
}

/// Authoritative in-memory balance ledger.
///
/// The ledger is the single source of truth for user funds. Every other
/// component moves balance only through `credit`/`debit`; nothing else may
/// touch the map. All mutation happens under one lock so a debit's
/// check-and-apply is atomic and a balance can never be observed negative.
#[derive(Default)]
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

#[derive(Default)]
struct LedgerInner {
    balances: HashMap<UserId, u64>,
}

impl Ledger {
    /// Adds `amount` to the user's balance, creating the account on first
    /// touch. Saturates at `u64::MAX` instead of wrapping. Returns the new
    /// balance.
    pub async fn credit(&self, user: UserId, amount: u64) -> u64 {
        let mut inner = self.inner.lock().await;
        let balance = inner.balances.entry(user).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    /// Removes `amount` from the user's balance. Fails with no effect when
    /// the balance cannot cover the amount. Returns the new balance.
    pub async fn debit(&self, user: UserId, amount: u64) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock().await;
        let balance = inner.balances.entry(user).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: *balance,
                needed: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    pub async fn balance_of(&self, user: UserId) -> u64 {
        let inner = self.inner.lock().await;
        inner.balances.get(&user).copied().unwrap_or(0)
    }
}
