#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::config::Config;
use crate::gateway::{HttpPaymentGateway, PaymentGateway};
use crate::gifts::GiftRoller;
use crate::invoices::InvoiceRegistry;
use crate::ledger::Ledger;
use crate::notify::AdminNotifier;
use crate::payments::{PaymentPolicy, PaymentProcessor, PaymentStore};
use crate::refunds::RefundCoordinator;
use crate::subscriptions::SubscriptionBook;
use crate::transfers::TransferEscrow;

pub mod config;
pub mod gateway;
pub mod gifts;
pub mod invoices;
pub mod ledger;
pub mod notify;
pub mod payments;
pub mod refunds;
pub mod schedule;
pub mod subscriptions;
pub mod token;
pub mod transfers;

pub use config::ConfigError;
pub use ledger::UserId;
pub use payments::{PaymentError, SettlementOutcome};

/// Fully wired payment core: one ledger, one invoice registry and the
/// services that operate on them. Every field is shared, so callers can
/// hand individual pieces to their own frontends.
pub struct Core {
    pub config: Config,
    pub ledger: Arc<Ledger>,
    pub invoices: Arc<InvoiceRegistry>,
    pub escrow: Arc<TransferEscrow>,
    pub roller: Arc<GiftRoller>,
    pub subscriptions: Arc<SubscriptionBook>,
    pub store: Arc<dyn PaymentStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn AdminNotifier>,
    pub payments: Arc<PaymentProcessor>,
    pub refunds: Arc<RefundCoordinator>,
}

/// Builds the core from configuration alone. The HTTP gateway is used
/// when its endpoint is configured, otherwise the in-memory one; admin
/// notifications go to the in-memory notifier until a real frontend
/// plugs its own into [`build_core_with`].
pub fn build_core(config: Config) -> Core {
    let gateway: Arc<dyn PaymentGateway> =
        match (&config.gateway_base_url, &config.gateway_auth_token) {
            (Some(base_url), Some(auth_token)) => Arc::new(HttpPaymentGateway::new(
                base_url.clone(),
                auth_token.clone(),
                config.gateway_timeout_ms,
            )),
            _ => gateway::memory(),
        };
    build_core_with(config, gateway, notify::memory())
}

pub fn build_core_with(
    config: Config,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn AdminNotifier>,
) -> Core {
    let ledger = Arc::new(Ledger::default());
    let invoices = Arc::new(InvoiceRegistry::default());
    let escrow = Arc::new(TransferEscrow::new(
        Arc::clone(&ledger),
        config.fee_policy,
        config.fee_sink_user_id,
    ));
    let roller = Arc::new(GiftRoller::new(config.prize_table.clone()));
    let subscriptions = Arc::new(SubscriptionBook::default());
    let store = payments::store::memory();
    let policy = PaymentPolicy {
        currency: config.currency.clone(),
        roll_price: config.roll_price,
        subscription_price: config.subscription_price,
        subscription_period_days: config.subscription_period_days,
        operator_id: config.operator_id,
    };
    let payments = Arc::new(PaymentProcessor::new(
        Arc::clone(&ledger),
        Arc::clone(&invoices),
        Arc::clone(&store),
        Arc::clone(&escrow),
        Arc::clone(&roller),
        Arc::clone(&subscriptions),
        Arc::clone(&gateway),
        Arc::clone(&notifier),
        policy,
    ));
    let refunds = Arc::new(RefundCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        Arc::clone(&roller),
        Arc::clone(&gateway),
    ));
    Core {
        config,
        ledger,
        invoices,
        escrow,
        roller,
        subscriptions,
        store,
        gateway,
        notifier,
        payments,
        refunds,
    }
}
