use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gifts::GiftAward;
use crate::ledger::UserId;
use crate::transfers::EscrowEntry;

/// Payment-completed notification delivered by the gateway, at least once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub charge_id: String,
    pub token: String,
    pub amount: u64,
    pub currency: String,
}

/// One settled gateway charge. Created on first successful crediting;
/// `refunded` is the sole refund-idempotency guard and is never unset.
/// `tracking_code` ties a roll payment to its award so a refund can mark it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub charge_id: String,
    pub user_id: UserId,
    pub amount: u64,
    pub token: String,
    pub refunded: bool,
    pub tracking_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a confirmed payment unlocked.
#[derive(Clone, Debug)]
pub enum SettlementOutcome {
    Rolled {
        award: GiftAward,
    },
    Transferred {
        entry: EscrowEntry,
    },
    Subscribed {
        user_id: UserId,
        expires_at: DateTime<Utc>,
    },
}

/// Invoice handed back to the caller for presentation to the user.
#[derive(Clone, Debug)]
pub struct IssuedInvoice {
    pub token: String,
    pub invoice_id: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefundReceipt {
    pub charge_id: String,
    pub user_id: UserId,
    pub amount: u64,
    pub refunded_at: DateTime<Utc>,
}
