use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::payments::types::PaymentRecord;

#[derive(Debug, thiserror::Error)]
pub enum PaymentStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Durable home of payment records, keyed by gateway charge id.
///
/// `claim_charge` is the at-least-once-delivery guard: the existence check
/// and the insert are one operation under the store lock, so two
/// concurrent deliveries of the same charge cannot both observe "not yet
/// recorded".
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Creates the record unless the charge id is already claimed. Returns
    /// the stored record and whether this call created it.
    async fn claim_charge(
        &self,
        record: PaymentRecord,
    ) -> Result<(PaymentRecord, bool), PaymentStoreError>;

    async fn get_charge(&self, charge_id: &str)
    -> Result<Option<PaymentRecord>, PaymentStoreError>;

    /// Removes a claim that never credited (its token had no matching
    /// intent). Only the claiming caller may release.
    async fn release_charge(&self, charge_id: &str) -> Result<(), PaymentStoreError>;

    async fn set_tracking_code(
        &self,
        charge_id: &str,
        tracking_code: &str,
    ) -> Result<PaymentRecord, PaymentStoreError>;

    /// Flips the one-way refunded flag. Conflict when already set; the
    /// flag is never cleared again.
    async fn mark_refunded(&self, charge_id: &str) -> Result<PaymentRecord, PaymentStoreError>;
}

pub fn memory() -> Arc<dyn PaymentStore> {
    Arc::new(MemoryPaymentStore::default())
}

#[derive(Default)]
struct MemoryPaymentStore {
    inner: Mutex<MemoryPaymentStoreInner>,
}

#[derive(Default)]
struct MemoryPaymentStoreInner {
    charges: HashMap<String, PaymentRecord>,
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn claim_charge(
        &self,
        record: PaymentRecord,
    ) -> Result<(PaymentRecord, bool), PaymentStoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.charges.get(&record.charge_id) {
            return Ok((existing.clone(), false));
        }
        inner
            .charges
            .insert(record.charge_id.clone(), record.clone());
        Ok((record, true))
    }

    async fn get_charge(
        &self,
        charge_id: &str,
    ) -> Result<Option<PaymentRecord>, PaymentStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.charges.get(charge_id).cloned())
    }

    async fn release_charge(&self, charge_id: &str) -> Result<(), PaymentStoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .charges
            .remove(charge_id)
            .map(|_| ())
            .ok_or_else(|| PaymentStoreError::NotFound(format!("charge {charge_id} not claimed")))
    }

    async fn set_tracking_code(
        &self,
        charge_id: &str,
        tracking_code: &str,
    ) -> Result<PaymentRecord, PaymentStoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| PaymentStoreError::NotFound(format!("charge {charge_id} unknown")))?;
        record.tracking_code = Some(tracking_code.to_string());
        Ok(record.clone())
    }

    async fn mark_refunded(&self, charge_id: &str) -> Result<PaymentRecord, PaymentStoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .charges
            .get_mut(charge_id)
            .ok_or_else(|| PaymentStoreError::NotFound(format!("charge {charge_id} unknown")))?;
        if record.refunded {
            return Err(PaymentStoreError::Conflict(format!(
                "charge {charge_id} already refunded"
            )));
        }
        record.refunded = true;
        Ok(record.clone())
    }
}
