use std::sync::Arc;

use chrono::Utc;

use crate::gateway::PaymentGateway;
use crate::gifts::GiftRoller;
use crate::ledger::{Ledger, LedgerError, UserId};
use crate::payments::service::{PaymentError, map_store_error};
use crate::payments::store::PaymentStore;
use crate::payments::types::RefundReceipt;

/// Reverses settled charges: the gateway returns the payment, the ledger
/// gives back exactly what the charge credited, and the charge record is
/// flagged so it can never be refunded twice.
pub struct RefundCoordinator {
    store: Arc<dyn PaymentStore>,
    ledger: Arc<Ledger>,
    roller: Arc<GiftRoller>,
    gateway: Arc<dyn PaymentGateway>,
}

impl RefundCoordinator {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        ledger: Arc<Ledger>,
        roller: Arc<GiftRoller>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            store,
            ledger,
            roller,
            gateway,
        }
    }

    /// Refunds one charge for its owner. Checks run before the gateway is
    /// contacted, so a rejected request leaves no state anywhere. The local
    /// debit happens only after the gateway accepted the reversal; losing a
    /// concurrent race on the refund flag re-credits the debit.
    pub async fn refund(
        &self,
        requester: UserId,
        charge_id: &str,
    ) -> Result<RefundReceipt, PaymentError> {
        let charge_id = charge_id.trim();
        if charge_id.is_empty() {
            return Err(PaymentError::InvalidInput(
                "charge id is required".to_string(),
            ));
        }

        let record = self
            .store
            .get_charge(charge_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| PaymentError::NotFound(format!("no charge {charge_id}")))?;
        if record.user_id != requester {
            return Err(PaymentError::NotOwner(
                "charge belongs to another user".to_string(),
            ));
        }
        if record.refunded {
            return Err(PaymentError::AlreadyRefunded(format!(
                "charge {charge_id} already refunded"
            )));
        }
        let available = self.ledger.balance_of(requester).await;
        if available < record.amount {
            return Err(PaymentError::InsufficientBalance {
                available,
                needed: record.amount,
            });
        }

        self.gateway
            .refund_payment(requester, charge_id)
            .await
            .map_err(|error| PaymentError::GatewayFailure(error.to_string()))?;

        self.ledger
            .debit(requester, record.amount)
            .await
            .map_err(|error| match error {
                LedgerError::InsufficientBalance { available, needed } => {
                    PaymentError::InsufficientBalance { available, needed }
                }
            })?;

        if let Err(error) = self.store.mark_refunded(charge_id).await {
            // A concurrent refund won the flag after our debit landed.
            self.ledger.credit(requester, record.amount).await;
            return Err(map_store_error(error));
        }

        if let Some(tracking_code) = &record.tracking_code {
            if let Err(error) = self.roller.mark_refunded(tracking_code).await {
                tracing::warn!(
                    charge_id,
                    tracking_code = %tracking_code,
                    reason = %error,
                    "refunded charge references an unknown award"
                );
            }
        }

        tracing::info!(charge_id, user_id = requester, amount = record.amount, "charge refunded");
        Ok(RefundReceipt {
            charge_id: charge_id.to_string(),
            user_id: requester,
            amount: record.amount,
            refunded_at: Utc::now(),
        })
    }
}
