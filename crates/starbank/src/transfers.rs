use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerError, UserId};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid transfer: {0}")]
    InvalidAmount(String),
    #[error("invalid fee policy: {0}")]
    InvalidPolicy(String),
    #[error("insufficient balance: have {available}, need {needed}")]
    InsufficientBalance { available: u64, needed: u64 },
}

/// Tiered flat fee: transfers below the threshold are free, everything
/// else pays the flat amount. Both values are deploy configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    threshold: u64,
    flat: u64,
}

impl FeePolicy {
    /// The flat fee must not exceed the threshold, otherwise a transfer at
    /// the threshold could net below zero.
    pub fn new(threshold: u64, flat: u64) -> Result<Self, TransferError> {
        if flat > threshold {
            return Err(TransferError::InvalidPolicy(format!(
                "flat fee {flat} exceeds threshold {threshold}"
            )));
        }
        Ok(Self { threshold, flat })
    }

    pub fn fee_for(&self, gross: u64) -> u64 {
        if gross < self.threshold { 0 } else { self.flat }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn flat(&self) -> u64 {
        self.flat
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            flat: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Settled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowEntry {
    pub escrow_id: String,
    pub from: UserId,
    pub to: UserId,
    pub gross: u64,
    pub fee: u64,
    pub net: u64,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Stages peer-to-peer transfers and settles them once payment confirms.
///
/// `propose` only computes terms; no funds move until `settle`, which the
/// payment pipeline invokes after the gateway confirms the sender paid the
/// gross amount. The debit is the all-or-nothing step: when the sender's
/// ledger balance cannot cover the gross amount nothing is mutated.
pub struct TransferEscrow {
    ledger: Arc<Ledger>,
    policy: FeePolicy,
    fee_sink: Option<UserId>,
    settled: Mutex<Vec<EscrowEntry>>,
}

impl TransferEscrow {
    pub fn new(ledger: Arc<Ledger>, policy: FeePolicy, fee_sink: Option<UserId>) -> Self {
        Self {
            ledger,
            policy,
            fee_sink,
            settled: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> FeePolicy {
        self.policy
    }

    /// Computes fee and net for a transfer and stages the terms behind the
    /// invoice. Rejects zero amounts and self-transfers. Moves no funds.
    pub fn propose(&self, from: UserId, to: UserId, gross: u64) -> Result<EscrowEntry, TransferError> {
        if gross == 0 {
            return Err(TransferError::InvalidAmount(
                "amount must be positive".to_string(),
            ));
        }
        if from == to {
            return Err(TransferError::InvalidAmount(
                "sender and receiver must differ".to_string(),
            ));
        }
        let fee = self.policy.fee_for(gross);
        Ok(EscrowEntry {
            escrow_id: format!("esc_{}", Uuid::new_v4().simple()),
            from,
            to,
            gross,
            fee,
            net: gross - fee,
            status: EscrowStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        })
    }

    /// Moves the staged funds: debits the sender by the gross amount,
    /// credits the receiver the net, and credits the fee to the configured
    /// sink account. Without a sink the fee is burned. The fee is the one
    /// staged at propose time, not recomputed.
    pub async fn settle(
        &self,
        from: UserId,
        to: UserId,
        gross: u64,
        fee: u64,
    ) -> Result<EscrowEntry, TransferError> {
        let net = gross.checked_sub(fee).ok_or_else(|| {
            TransferError::InvalidAmount(format!("fee {fee} exceeds gross {gross}"))
        })?;

        self.ledger
            .debit(from, gross)
            .await
            .map_err(|LedgerError::InsufficientBalance { available, needed }| {
                TransferError::InsufficientBalance { available, needed }
            })?;
        self.ledger.credit(to, net).await;
        if fee > 0 {
            if let Some(sink) = self.fee_sink {
                self.ledger.credit(sink, fee).await;
            }
        }

        let entry = EscrowEntry {
            escrow_id: format!("esc_{}", Uuid::new_v4().simple()),
            from,
            to,
            gross,
            fee,
            net,
            status: EscrowStatus::Settled,
            created_at: Utc::now(),
            settled_at: Some(Utc::now()),
        };
        let mut settled = self.settled.lock().await;
        settled.push(entry.clone());
        Ok(entry)
    }

    pub async fn settled(&self) -> Vec<EscrowEntry> {
        let settled = self.settled.lock().await;
        settled.clone()
    }
}
