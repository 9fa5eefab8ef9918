use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::gateway::{CreateInvoiceRequest, PaymentGateway};
use crate::gifts::{GiftAward, GiftError, GiftRoller};
use crate::invoices::{Intent, InvoiceError, InvoiceRegistry};
use crate::ledger::{Ledger, UserId};
use crate::notify::{AdminNotifier, spawn_award_notification};
use crate::payments::store::{PaymentStore, PaymentStoreError};
use crate::payments::types::{IssuedInvoice, PaymentConfirmed, PaymentRecord, SettlementOutcome};
use crate::subscriptions::SubscriptionBook;
use crate::token::IntentToken;
use crate::transfers::{TransferError, TransferEscrow};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient balance: have {available}, need {needed}")]
    InsufficientBalance { available: u64, needed: u64 },
    #[error("unknown token: {0}")]
    UnknownToken(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not owner: {0}")]
    NotOwner(String),
    #[error("duplicate charge: {0}")]
    DuplicateCharge(String),
    #[error("already refunded: {0}")]
    AlreadyRefunded(String),
    #[error("gateway failure: {0}")]
    GatewayFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::UnknownToken(_) => "unknown_token",
            Self::NotFound(_) => "not_found",
            Self::NotOwner(_) => "not_owner",
            Self::DuplicateCharge(_) => "duplicate_charge",
            Self::AlreadyRefunded(_) => "already_refunded",
            Self::GatewayFailure(_) => "gateway_failure",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PaymentPolicy {
    /// Gateway currency code every inbound event must match.
    pub currency: String,
    pub roll_price: u64,
    pub subscription_price: u64,
    pub subscription_period_days: u32,
    /// The privileged operator allowed to confirm award delivery.
    pub operator_id: UserId,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            currency: "XTR".to_string(),
            roll_price: 1,
            subscription_price: 25,
            subscription_period_days: 30,
            operator_id: 0,
        }
    }
}

/// Entry point for gateway callbacks and user purchase requests.
///
/// Owns the invoice registry and the payment records; every other
/// component is reached through its own interface. The confirmed-payment
/// pipeline is ordered so that no ledger mutation can happen for a charge
/// that is a duplicate or references no known intent.
pub struct PaymentProcessor {
    ledger: Arc<Ledger>,
    invoices: Arc<InvoiceRegistry>,
    store: Arc<dyn PaymentStore>,
    escrow: Arc<TransferEscrow>,
    roller: Arc<GiftRoller>,
    subscriptions: Arc<SubscriptionBook>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn AdminNotifier>,
    policy: PaymentPolicy,
}

impl PaymentProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        invoices: Arc<InvoiceRegistry>,
        store: Arc<dyn PaymentStore>,
        escrow: Arc<TransferEscrow>,
        roller: Arc<GiftRoller>,
        subscriptions: Arc<SubscriptionBook>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn AdminNotifier>,
        policy: PaymentPolicy,
    ) -> Self {
        Self {
            ledger,
            invoices,
            store,
            escrow,
            roller,
            subscriptions,
            gateway,
            notifier,
            policy,
        }
    }

    /// Stages a roll intent and asks the gateway for an invoice. On
    /// gateway failure the pending registry entry is abandoned so retry
    /// starts clean.
    pub async fn request_roll_invoice(&self, user: UserId) -> Result<IssuedInvoice, PaymentError> {
        validate_user_id(user)?;
        let token = self
            .invoices
            .open(Intent::Roll { user_id: user })
            .await
            .map_err(map_invoice_error)?;
        self.issue_invoice(
            token,
            "Gift roll".to_string(),
            "One weighted gift roll".to_string(),
            self.policy.roll_price,
        )
        .await
    }

    /// Stages a transfer (fee computed now, carried in the stored intent)
    /// and asks the gateway to collect the gross amount from the sender.
    pub async fn request_transfer_invoice(
        &self,
        from: UserId,
        to: UserId,
        gross: u64,
    ) -> Result<IssuedInvoice, PaymentError> {
        validate_user_id(from)?;
        validate_user_id(to)?;
        let entry = self
            .escrow
            .propose(from, to, gross)
            .map_err(map_transfer_error)?;
        let token = self
            .invoices
            .open(Intent::Transfer {
                from: entry.from,
                to: entry.to,
                gross: entry.gross,
                fee: entry.fee,
            })
            .await
            .map_err(map_invoice_error)?;
        self.issue_invoice(
            token,
            "Balance transfer".to_string(),
            format!("Send {} to user {}", entry.net, entry.to),
            entry.gross,
        )
        .await
    }

    pub async fn request_subscription_invoice(
        &self,
        user: UserId,
    ) -> Result<IssuedInvoice, PaymentError> {
        validate_user_id(user)?;
        let token = self
            .invoices
            .open(Intent::Subscription { user_id: user })
            .await
            .map_err(map_invoice_error)?;
        self.issue_invoice(
            token,
            "Subscription".to_string(),
            format!("{} days of subscription", self.policy.subscription_period_days),
            self.policy.subscription_price,
        )
        .await
    }

    /// Pre-payment validation the gateway blocks on. Parse plus one
    /// registry lookup; never any ledger work, so the answer is immediate.
    pub async fn acknowledge_pre_checkout(&self, token: &str) -> Result<(), PaymentError> {
        IntentToken::parse(token).map_err(|error| PaymentError::UnknownToken(error.to_string()))?;
        if !self.invoices.is_pending(token).await {
            return Err(PaymentError::UnknownToken(
                "no pending invoice for token".to_string(),
            ));
        }
        Ok(())
    }

    /// Settles a payment-completed event. Duplicate deliveries of the same
    /// charge id credit exactly once; events whose token matches no pending
    /// intent leave the ledger untouched.
    pub async fn on_payment_confirmed(
        &self,
        event: PaymentConfirmed,
    ) -> Result<SettlementOutcome, PaymentError> {
        let charge_id = normalize_charge_id(&event.charge_id)?;
        if event.amount == 0 {
            return Err(PaymentError::InvalidInput(
                "amount must be positive".to_string(),
            ));
        }
        if event.currency != self.policy.currency {
            return Err(PaymentError::InvalidInput(format!(
                "unsupported currency {}",
                event.currency
            )));
        }
        let parsed = IntentToken::parse(&event.token)
            .map_err(|error| PaymentError::UnknownToken(error.to_string()))?;
        let payer = parsed.payer();

        // Claim before consume: the claim is the atomic duplicate guard,
        // and it can be released if the token turns out to match nothing.
        let record = PaymentRecord {
            charge_id: charge_id.clone(),
            user_id: payer,
            amount: event.amount,
            token: event.token.clone(),
            refunded: false,
            tracking_code: None,
            created_at: Utc::now(),
        };
        let (_, created) = self
            .store
            .claim_charge(record)
            .await
            .map_err(map_store_error)?;
        if !created {
            return Err(PaymentError::DuplicateCharge(format!(
                "charge {charge_id} already processed"
            )));
        }

        let intent = match self.invoices.consume(&event.token).await {
            Ok(intent) => intent,
            Err(error) => {
                if let Err(release_error) = self.store.release_charge(&charge_id).await {
                    tracing::warn!(
                        charge_id = %charge_id,
                        reason = %release_error,
                        "failed to release unmatched charge claim"
                    );
                }
                return Err(PaymentError::UnknownToken(error.to_string()));
            }
        };

        self.ledger.credit(payer, event.amount).await;

        match intent {
            Intent::Roll { user_id } => {
                let award = self.roller.roll(user_id).await;
                self.store
                    .set_tracking_code(&charge_id, &award.tracking_code)
                    .await
                    .map_err(map_store_error)?;
                spawn_award_notification(Arc::clone(&self.notifier), user_id, award.clone());
                tracing::info!(charge_id = %charge_id, prize = %award.prize, "roll settled");
                Ok(SettlementOutcome::Rolled { award })
            }
            Intent::Transfer {
                from,
                to,
                gross,
                fee,
            } => {
                let entry = self
                    .escrow
                    .settle(from, to, gross, fee)
                    .await
                    .map_err(map_transfer_error)?;
                tracing::info!(charge_id = %charge_id, escrow_id = %entry.escrow_id, "transfer settled");
                Ok(SettlementOutcome::Transferred { entry })
            }
            Intent::Subscription { user_id } => {
                let expires_at = self
                    .subscriptions
                    .extend(
                        user_id,
                        Duration::days(i64::from(self.policy.subscription_period_days)),
                    )
                    .await;
                tracing::info!(charge_id = %charge_id, user_id, "subscription extended");
                Ok(SettlementOutcome::Subscribed {
                    user_id,
                    expires_at,
                })
            }
        }
    }

    /// Operator-only confirmation that a prize physically shipped.
    pub async fn mark_award_delivered(
        &self,
        operator: UserId,
        tracking_code: &str,
    ) -> Result<GiftAward, PaymentError> {
        if operator != self.policy.operator_id {
            return Err(PaymentError::NotOwner(
                "only the operator may confirm delivery".to_string(),
            ));
        }
        self.roller
            .mark_delivered(tracking_code)
            .await
            .map_err(map_gift_error)
    }

    async fn issue_invoice(
        &self,
        token: String,
        title: String,
        description: String,
        unit_price: u64,
    ) -> Result<IssuedInvoice, PaymentError> {
        let request = CreateInvoiceRequest {
            title,
            description,
            token: token.clone(),
            currency: self.policy.currency.clone(),
            unit_price,
        };
        match self.gateway.create_invoice(request).await {
            Ok(invoice) => Ok(IssuedInvoice {
                token,
                invoice_id: invoice.invoice_id,
                url: invoice.url,
            }),
            Err(error) => {
                // Leave no trace of the attempt so a retry starts clean.
                self.invoices.abandon(&token).await;
                tracing::warn!(reason = %error, "invoice creation failed at gateway");
                Err(PaymentError::GatewayFailure(error.to_string()))
            }
        }
    }
}

fn validate_user_id(user: UserId) -> Result<(), PaymentError> {
    if user == 0 {
        return Err(PaymentError::InvalidInput(
            "user id must be positive".to_string(),
        ));
    }
    Ok(())
}

fn normalize_charge_id(raw: &str) -> Result<String, PaymentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::InvalidInput(
            "charge id is required".to_string(),
        ));
    }
    if trimmed.len() > 200 {
        return Err(PaymentError::InvalidInput("charge id too long".to_string()));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn map_store_error(error: PaymentStoreError) -> PaymentError {
    match error {
        PaymentStoreError::Conflict(message) => PaymentError::AlreadyRefunded(message),
        PaymentStoreError::NotFound(message) => PaymentError::NotFound(message),
        PaymentStoreError::Db(message) => PaymentError::Internal(message),
    }
}

pub(crate) fn map_gift_error(error: GiftError) -> PaymentError {
    match error {
        GiftError::NotFound => PaymentError::NotFound("unknown tracking code".to_string()),
        GiftError::AlreadyRefunded => {
            PaymentError::AlreadyRefunded("award already refunded".to_string())
        }
        GiftError::InvalidTable(message) => PaymentError::Internal(message),
    }
}

fn map_transfer_error(error: TransferError) -> PaymentError {
    match error {
        TransferError::InvalidAmount(message) => PaymentError::InvalidInput(message),
        TransferError::InvalidPolicy(message) => PaymentError::Internal(message),
        TransferError::InsufficientBalance { available, needed } => {
            PaymentError::InsufficientBalance { available, needed }
        }
    }
}

fn map_invoice_error(error: InvoiceError) -> PaymentError {
    match error {
        InvoiceError::NotFound => PaymentError::UnknownToken("unknown invoice token".to_string()),
        InvoiceError::AlreadyConsumed => {
            PaymentError::UnknownToken("invoice already consumed".to_string())
        }
        InvoiceError::Internal(message) => PaymentError::Internal(message),
    }
}
