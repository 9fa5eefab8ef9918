use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::UserId;

/// Wire format version. Bump when the envelope or any variant changes shape.
pub const TOKEN_VERSION: u32 = 1;

/// Upper bound on accepted token text. Gateway payloads are short; anything
/// larger is rejected before JSON parsing is attempted.
const MAX_TOKEN_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u32),
    #[error("token encoding failed: {0}")]
    Encode(String),
}

/// Correlation token linking an issued invoice to the intent it pays for.
///
/// The token travels through the external gateway as an opaque string and
/// comes back attached to the payment-completed event. It is never trusted
/// as authority over funds; the registry's stored intent is. Each variant
/// carries a random nonce so two otherwise identical requests produce
/// distinct tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentToken {
    Roll(RollToken),
    Transfer(TransferToken),
    Subscription(SubscriptionToken),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollToken {
    pub user_id: UserId,
    pub nonce: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferToken {
    pub from: UserId,
    pub to: UserId,
    pub amount: u64,
    pub nonce: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionToken {
    pub user_id: UserId,
    pub nonce: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenEnvelope {
    v: u32,
    intent: IntentToken,
}

impl IntentToken {
    pub fn roll(user_id: UserId) -> Self {
        Self::Roll(RollToken {
            user_id,
            nonce: fresh_nonce(),
        })
    }

    pub fn transfer(from: UserId, to: UserId, amount: u64) -> Self {
        Self::Transfer(TransferToken {
            from,
            to,
            amount,
            nonce: fresh_nonce(),
        })
    }

    pub fn subscription(user_id: UserId) -> Self {
        Self::Subscription(SubscriptionToken {
            user_id,
            nonce: fresh_nonce(),
        })
    }

    /// The user whose gateway payment this token correlates. For transfers
    /// that is the sender.
    pub fn payer(&self) -> UserId {
        match self {
            Self::Roll(roll) => roll.user_id,
            Self::Transfer(transfer) => transfer.from,
            Self::Subscription(subscription) => subscription.user_id,
        }
    }

    pub fn encode(&self) -> Result<String, TokenError> {
        let envelope = TokenEnvelope {
            v: TOKEN_VERSION,
            intent: self.clone(),
        };
        serde_json::to_string(&envelope).map_err(|error| TokenError::Encode(error.to_string()))
    }

    /// Strict parse. Any deviation from the exact envelope shape (unknown
    /// fields, missing fields, wrong version, trailing garbage) is rejected
    /// whole; there is no partial parse.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TokenError::Malformed("empty token".to_string()));
        }
        if trimmed.len() > MAX_TOKEN_LEN {
            return Err(TokenError::Malformed("token too long".to_string()));
        }
        let envelope: TokenEnvelope = serde_json::from_str(trimmed)
            .map_err(|error| TokenError::Malformed(error.to_string()))?;
        if envelope.v != TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion(envelope.v));
        }
        Ok(envelope.intent)
    }
}

fn fresh_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}
