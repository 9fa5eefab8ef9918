use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ledger::UserId;
use crate::token::IntentToken;

/// Business action a pending payment is meant to unlock. This is the
/// authoritative copy held by the registry; the wire token only correlates
/// back to it. Transfers carry the fee staged at propose time so a later
/// fee-policy change cannot reprice an in-flight transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Roll {
        user_id: UserId,
    },
    Transfer {
        from: UserId,
        to: UserId,
        gross: u64,
        fee: u64,
    },
    Subscription {
        user_id: UserId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Consumed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceEntry {
    pub token: String,
    pub intent: Intent,
    pub status: InvoiceStatus,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum InvoiceError {
    #[error("unknown invoice token")]
    NotFound,
    #[error("invoice already consumed")]
    AlreadyConsumed,
    #[error("internal: {0}")]
    Internal(String),
}

/// Maps correlation tokens to their pending intent and consumption state.
///
/// `consume` is the idempotency boundary for "realize this intent": the
/// Pending -> Consumed transition happens under the registry lock, so with
/// concurrent deliveries of the same token exactly one caller receives the
/// intent.
#[derive(Default)]
pub struct InvoiceRegistry {
    entries: Mutex<HashMap<String, InvoiceEntry>>,
}

impl InvoiceRegistry {
    /// Stores the intent under a fresh unpredictable token and returns the
    /// token text to embed in the gateway invoice.
    pub async fn open(&self, intent: Intent) -> Result<String, InvoiceError> {
        let wire = match &intent {
            Intent::Roll { user_id } => IntentToken::roll(*user_id),
            Intent::Transfer {
                from, to, gross, ..
            } => IntentToken::transfer(*from, *to, *gross),
            Intent::Subscription { user_id } => IntentToken::subscription(*user_id),
        };
        let token = wire
            .encode()
            .map_err(|error| InvoiceError::Internal(error.to_string()))?;

        let mut entries = self.entries.lock().await;
        entries.insert(
            token.clone(),
            InvoiceEntry {
                token: token.clone(),
                intent,
                status: InvoiceStatus::Pending,
                opened_at: Utc::now(),
            },
        );
        Ok(token)
    }

    /// Atomically transitions Pending -> Consumed and returns the stored
    /// intent. Only one concurrent caller can succeed per token.
    pub async fn consume(&self, token: &str) -> Result<Intent, InvoiceError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(token).ok_or(InvoiceError::NotFound)?;
        if entry.status == InvoiceStatus::Consumed {
            return Err(InvoiceError::AlreadyConsumed);
        }
        entry.status = InvoiceStatus::Consumed;
        Ok(entry.intent.clone())
    }

    /// Removes a still-Pending entry. Compensation for invoice creation
    /// failing at the gateway; a Consumed entry is never touched. Returns
    /// whether an entry was removed.
    pub async fn abandon(&self, token: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get(token) {
            Some(entry) if entry.status == InvoiceStatus::Pending => {
                entries.remove(token);
                true
            }
            _ => false,
        }
    }

    pub async fn is_pending(&self, token: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(token)
            .is_some_and(|entry| entry.status == InvoiceStatus::Pending)
    }

    pub async fn get(&self, token: &str) -> Option<InvoiceEntry> {
        let entries = self.entries.lock().await;
        entries.get(token).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| entry.status == InvoiceStatus::Pending)
            .count()
    }
}
