use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::UserId;

/// Shuffle frames shown before the reveal settles on the final prize.
pub const REVEAL_SHUFFLE_FRAMES: usize = 3;

/// Weight sums further than this from 1.0 fail table validation.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, thiserror::Error)]
pub enum GiftError {
    #[error("invalid prize table: {0}")]
    InvalidTable(String),
    #[error("unknown tracking code")]
    NotFound,
    #[error("award already refunded")]
    AlreadyRefunded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prize {
    pub name: String,
    pub weight: f64,
}

/// Fixed prize configuration. Validated once at load time so every draw
/// can assume a well-formed distribution.
#[derive(Clone, Debug)]
pub struct PrizeTable {
    prizes: Vec<Prize>,
}

impl PrizeTable {
    pub fn try_new(prizes: Vec<Prize>) -> Result<Self, GiftError> {
        if prizes.is_empty() {
            return Err(GiftError::InvalidTable("no prizes configured".to_string()));
        }
        let mut sum = 0.0_f64;
        for prize in &prizes {
            if prize.name.trim().is_empty() {
                return Err(GiftError::InvalidTable("prize with empty name".to_string()));
            }
            if !prize.weight.is_finite() || prize.weight <= 0.0 {
                return Err(GiftError::InvalidTable(format!(
                    "prize {} has non-positive weight {}",
                    prize.name, prize.weight
                )));
            }
            sum += prize.weight;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(GiftError::InvalidTable(format!(
                "weights sum to {sum}, expected 1.0"
            )));
        }
        Ok(Self { prizes })
    }

    pub fn prizes(&self) -> &[Prize] {
        &self.prizes
    }

    pub fn names(&self) -> Vec<String> {
        self.prizes.iter().map(|prize| prize.name.clone()).collect()
    }

    /// Single weighted draw: one uniform sample walked through the
    /// cumulative weights. Deterministic given the injected generator.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> &Prize {
        let sample: f64 = rng.random();
        let mut cumulative = 0.0_f64;
        for prize in &self.prizes {
            cumulative += prize.weight;
            if sample < cumulative {
                return prize;
            }
        }
        // Rounding drift can leave the sample past the last boundary.
        &self.prizes[self.prizes.len() - 1]
    }
}

impl Default for PrizeTable {
    // Weights sum to 1.0; `try_new` is bypassed only because the table is
    // fixed here and covered by tests.
    fn default() -> Self {
        Self {
            prizes: vec![
                Prize {
                    name: "heart".to_string(),
                    weight: 0.35,
                },
                Prize {
                    name: "teddy".to_string(),
                    weight: 0.30,
                },
                Prize {
                    name: "rose".to_string(),
                    weight: 0.20,
                },
                Prize {
                    name: "rocket".to_string(),
                    weight: 0.10,
                },
                Prize {
                    name: "diamond".to_string(),
                    weight: 0.05,
                },
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    Pending,
    Delivered,
    Refunded,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GiftAward {
    pub tracking_code: String,
    pub user_id: UserId,
    pub prize: String,
    pub status: AwardStatus,
    pub created_at: DateTime<Utc>,
}

/// Draws prizes and tracks the resulting awards through delivery or refund.
///
/// Awards are never deleted. Delivery and refund are independent terminal
/// markers: delivering twice is a replay, refunding wins over a later
/// delivery attempt.
pub struct GiftRoller {
    table: PrizeTable,
    awards: Mutex<HashMap<String, GiftAward>>,
}

impl GiftRoller {
    pub fn new(table: PrizeTable) -> Self {
        Self {
            table,
            awards: Mutex::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &PrizeTable {
        &self.table
    }

    pub async fn roll(&self, user: UserId) -> GiftAward {
        let prize = {
            let mut rng = rand::rng();
            self.table.draw(&mut rng).name.clone()
        };
        self.record_award(user, prize).await
    }

    /// Draw with an injected generator so distribution properties are
    /// testable.
    pub async fn roll_with<R: Rng>(&self, user: UserId, rng: &mut R) -> GiftAward {
        let prize = self.table.draw(rng).name.clone();
        self.record_award(user, prize).await
    }

    async fn record_award(&self, user: UserId, prize: String) -> GiftAward {
        let award = GiftAward {
            tracking_code: format!("gft_{}", Uuid::new_v4().simple()),
            user_id: user,
            prize,
            status: AwardStatus::Pending,
            created_at: Utc::now(),
        };
        let mut awards = self.awards.lock().await;
        awards.insert(award.tracking_code.clone(), award.clone());
        award
    }

    pub async fn get(&self, tracking_code: &str) -> Option<GiftAward> {
        let awards = self.awards.lock().await;
        awards.get(tracking_code).cloned()
    }

    /// Operator confirmation that the prize physically shipped. Replaying
    /// on an already Delivered award is accepted; a Refunded award is not
    /// deliverable.
    pub async fn mark_delivered(&self, tracking_code: &str) -> Result<GiftAward, GiftError> {
        let mut awards = self.awards.lock().await;
        let award = awards.get_mut(tracking_code).ok_or(GiftError::NotFound)?;
        match award.status {
            AwardStatus::Refunded => Err(GiftError::AlreadyRefunded),
            AwardStatus::Delivered => Ok(award.clone()),
            AwardStatus::Pending => {
                award.status = AwardStatus::Delivered;
                Ok(award.clone())
            }
        }
    }

    /// Terminal refund marker, set by the refund path after the charge
    /// reversal lands. Idempotent.
    pub async fn mark_refunded(&self, tracking_code: &str) -> Result<GiftAward, GiftError> {
        let mut awards = self.awards.lock().await;
        let award = awards.get_mut(tracking_code).ok_or(GiftError::NotFound)?;
        award.status = AwardStatus::Refunded;
        Ok(award.clone())
    }

    /// Cosmetic multi-frame reveal for an award. The prize is fixed before
    /// the first frame; frames only shuffle the display order.
    pub fn reveal(&self, award: &GiftAward) -> RevealSequence {
        let seed = rand::rng().random();
        self.reveal_seeded(award, seed)
    }

    pub fn reveal_seeded(&self, award: &GiftAward, seed: u64) -> RevealSequence {
        RevealSequence {
            names: self.table.names(),
            final_prize: award.prize.clone(),
            seed,
            rng: StdRng::seed_from_u64(seed),
            emitted: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevealFrame {
    /// A shuffled permutation of the prize list, shown while "spinning".
    Shuffle(Vec<String>),
    /// The settled outcome.
    Final(String),
}

/// Lazy, finite reveal animation: a few shuffled frames, then the final
/// prize. `restart` replays the identical sequence from the stored seed.
pub struct RevealSequence {
    names: Vec<String>,
    final_prize: String,
    seed: u64,
    rng: StdRng,
    emitted: usize,
}

impl RevealSequence {
    pub fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.emitted = 0;
    }
}

impl Iterator for RevealSequence {
    type Item = RevealFrame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted < REVEAL_SHUFFLE_FRAMES {
            self.emitted += 1;
            let mut frame = self.names.clone();
            frame.shuffle(&mut self.rng);
            return Some(RevealFrame::Shuffle(frame));
        }
        if self.emitted == REVEAL_SHUFFLE_FRAMES {
            self.emitted += 1;
            return Some(RevealFrame::Final(self.final_prize.clone()));
        }
        None
    }
}
