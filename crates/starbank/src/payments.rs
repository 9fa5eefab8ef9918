pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use service::{PaymentError, PaymentPolicy, PaymentProcessor};
pub use store::{PaymentStore, PaymentStoreError};
pub use types::{
    IssuedInvoice, PaymentConfirmed, PaymentRecord, RefundReceipt, SettlementOutcome,
};
