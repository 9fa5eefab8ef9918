use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result, bail};
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use chrono::Duration;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::gateway::{self, HttpPaymentGateway, MemoryPaymentGateway};
use crate::gifts::AwardStatus;
use crate::invoices::Intent;
use crate::notify::{self, MemoryAdminNotifier};
use crate::payments::service::PaymentError;
use crate::payments::types::{PaymentConfirmed, SettlementOutcome};
use crate::token::IntentToken;
use crate::{Core, build_core_with};

struct TestCore {
    core: Core,
    gateway: Arc<MemoryPaymentGateway>,
    notifier: Arc<MemoryAdminNotifier>,
}

fn test_config() -> Config {
    let values = HashMap::from([
        ("STARBANK_OPERATOR_ID", "99"),
        ("STARBANK_FEE_SINK_USER_ID", "900"),
    ]);
    Config::from_lookup(|key| values.get(key).map(ToString::to_string)).expect("test config")
}

fn wired() -> TestCore {
    let gateway = gateway::memory();
    let notifier = notify::memory();
    let core = build_core_with(test_config(), gateway.clone(), notifier.clone());
    TestCore {
        core,
        gateway,
        notifier,
    }
}

fn confirmed(charge_id: &str, token: &str, amount: u64) -> PaymentConfirmed {
    PaymentConfirmed {
        charge_id: charge_id.to_string(),
        token: token.to_string(),
        amount,
        currency: "XTR".to_string(),
    }
}

#[tokio::test]
async fn roll_purchase_settles_and_notifies_once() -> Result<()> {
    let t = wired();

    let invoice = t.core.payments.request_roll_invoice(7).await?;
    t.core
        .payments
        .acknowledge_pre_checkout(&invoice.token)
        .await?;

    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_roll_1", &invoice.token, 1))
        .await?;
    let SettlementOutcome::Rolled { award } = outcome else {
        bail!("expected a roll outcome");
    };

    assert_eq!(award.user_id, 7);
    assert_eq!(award.status, AwardStatus::Pending);
    assert_eq!(t.core.ledger.balance_of(7).await, 1);

    let record = t
        .core
        .store
        .get_charge("ch_roll_1")
        .await?
        .context("charge recorded")?;
    assert_eq!(
        record.tracking_code.as_deref(),
        Some(award.tracking_code.as_str())
    );

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let notes = t.notifier.notifications().await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].0, 7);
    Ok(())
}

#[tokio::test]
async fn duplicate_charge_delivery_credits_once() -> Result<()> {
    let t = wired();
    let invoice = t.core.payments.request_roll_invoice(7).await?;
    let event = confirmed("ch_dup", &invoice.token, 1);

    t.core.payments.on_payment_confirmed(event.clone()).await?;
    let second = t.core.payments.on_payment_confirmed(event).await;

    assert!(matches!(second, Err(PaymentError::DuplicateCharge(_))));
    assert_eq!(t.core.ledger.balance_of(7).await, 1);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(t.notifier.notifications().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_settle_exactly_once() -> Result<()> {
    let t = wired();
    let invoice = t.core.payments.request_roll_invoice(7).await?;
    let event = confirmed("ch_race", &invoice.token, 1);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let payments = Arc::clone(&t.core.payments);
        let event = event.clone();
        handles.push(tokio::spawn(async move {
            payments.on_payment_confirmed(event).await
        }));
    }

    let mut settled = 0;
    let mut duplicates = 0;
    for result in futures::future::join_all(handles).await {
        match result.expect("task") {
            Ok(SettlementOutcome::Rolled { .. }) => settled += 1,
            Err(PaymentError::DuplicateCharge(_)) => duplicates += 1,
            other => bail!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(settled, 1);
    assert_eq!(duplicates, 3);
    assert_eq!(t.core.ledger.balance_of(7).await, 1);
    Ok(())
}

#[tokio::test]
async fn malformed_events_are_rejected_before_any_state() -> Result<()> {
    let t = wired();
    let invoice = t.core.payments.request_roll_invoice(7).await?;

    let empty_charge = t
        .core
        .payments
        .on_payment_confirmed(confirmed("  ", &invoice.token, 1))
        .await;
    assert!(matches!(empty_charge, Err(PaymentError::InvalidInput(_))));

    let zero_amount = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_zero", &invoice.token, 0))
        .await;
    assert!(matches!(zero_amount, Err(PaymentError::InvalidInput(_))));

    let mut wrong_currency = confirmed("ch_cur", &invoice.token, 1);
    wrong_currency.currency = "USD".to_string();
    let wrong_currency = t.core.payments.on_payment_confirmed(wrong_currency).await;
    assert!(matches!(wrong_currency, Err(PaymentError::InvalidInput(_))));

    assert_eq!(t.core.ledger.balance_of(7).await, 0);
    assert!(t.core.invoices.is_pending(&invoice.token).await);
    Ok(())
}

#[tokio::test]
async fn unknown_tokens_leave_no_ledger_state() -> Result<()> {
    let t = wired();

    let garbage = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_garbage", "not a token", 1))
        .await;
    assert!(matches!(garbage, Err(PaymentError::UnknownToken(_))));

    // Well-formed but never staged through an invoice.
    let forged = IntentToken::roll(9).encode()?;
    let unstaged = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_forged", &forged, 1))
        .await;
    assert!(matches!(unstaged, Err(PaymentError::UnknownToken(_))));

    assert_eq!(t.core.ledger.balance_of(9).await, 0);
    assert!(t.core.store.get_charge("ch_forged").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn pre_checkout_only_accepts_pending_tokens() -> Result<()> {
    let t = wired();
    let invoice = t.core.payments.request_roll_invoice(7).await?;

    assert!(matches!(
        t.core.payments.acknowledge_pre_checkout("junk").await,
        Err(PaymentError::UnknownToken(_))
    ));
    let forged = IntentToken::roll(7).encode()?;
    assert!(matches!(
        t.core.payments.acknowledge_pre_checkout(&forged).await,
        Err(PaymentError::UnknownToken(_))
    ));

    t.core
        .payments
        .acknowledge_pre_checkout(&invoice.token)
        .await?;

    t.core
        .payments
        .on_payment_confirmed(confirmed("ch_ack", &invoice.token, 1))
        .await?;
    assert!(matches!(
        t.core
            .payments
            .acknowledge_pre_checkout(&invoice.token)
            .await,
        Err(PaymentError::UnknownToken(_))
    ));
    Ok(())
}

#[tokio::test]
async fn transfer_pipeline_moves_net_and_routes_the_fee() -> Result<()> {
    let t = wired();

    let invoice = t.core.payments.request_transfer_invoice(1, 2, 10).await?;
    let staged = t
        .core
        .invoices
        .get(&invoice.token)
        .await
        .context("staged intent")?;
    assert!(matches!(
        staged.intent,
        Intent::Transfer {
            from: 1,
            to: 2,
            gross: 10,
            fee: 3,
        }
    ));

    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_tr", &invoice.token, 10))
        .await?;
    let SettlementOutcome::Transferred { entry } = outcome else {
        bail!("expected a transfer outcome");
    };

    assert_eq!(entry.gross, 10);
    assert_eq!(entry.fee, 3);
    assert_eq!(entry.net, 7);
    assert_eq!(t.core.ledger.balance_of(1).await, 0);
    assert_eq!(t.core.ledger.balance_of(2).await, 7);
    assert_eq!(t.core.ledger.balance_of(900).await, 3, "fee sink collects");
    assert_eq!(t.core.escrow.settled().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn small_transfers_are_fee_free() -> Result<()> {
    let t = wired();

    let invoice = t.core.payments.request_transfer_invoice(1, 2, 4).await?;
    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_small", &invoice.token, 4))
        .await?;
    let SettlementOutcome::Transferred { entry } = outcome else {
        bail!("expected a transfer outcome");
    };

    assert_eq!(entry.fee, 0);
    assert_eq!(t.core.ledger.balance_of(2).await, 4);
    assert_eq!(t.core.ledger.balance_of(900).await, 0);
    Ok(())
}

#[tokio::test]
async fn transfer_requests_validate_participants_and_amount() {
    let t = wired();

    assert!(matches!(
        t.core.payments.request_transfer_invoice(1, 1, 5).await,
        Err(PaymentError::InvalidInput(_))
    ));
    assert!(matches!(
        t.core.payments.request_transfer_invoice(1, 2, 0).await,
        Err(PaymentError::InvalidInput(_))
    ));
    assert!(matches!(
        t.core.payments.request_transfer_invoice(0, 2, 5).await,
        Err(PaymentError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn subscription_payments_stack_on_the_current_expiry() -> Result<()> {
    let t = wired();

    let first = t.core.payments.request_subscription_invoice(5).await?;
    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_sub_1", &first.token, 25))
        .await?;
    let SettlementOutcome::Subscribed { expires_at, .. } = outcome else {
        bail!("expected a subscription outcome");
    };
    assert!(t.core.subscriptions.is_active(5).await);

    let second = t.core.payments.request_subscription_invoice(5).await?;
    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_sub_2", &second.token, 25))
        .await?;
    let SettlementOutcome::Subscribed {
        expires_at: stacked,
        ..
    } = outcome
    else {
        bail!("expected a subscription outcome");
    };

    assert_eq!(stacked - expires_at, Duration::days(30));
    Ok(())
}

#[tokio::test]
async fn gateway_failure_abandons_the_staged_invoice() -> Result<()> {
    let t = wired();
    t.gateway.fail_invoices(true);

    let result = t.core.payments.request_roll_invoice(7).await;
    assert!(matches!(result, Err(PaymentError::GatewayFailure(_))));
    assert_eq!(t.gateway.invoice_calls(), 1);
    assert_eq!(t.core.invoices.pending_count().await, 0);

    t.gateway.fail_invoices(false);
    t.core.payments.request_roll_invoice(7).await?;
    assert_eq!(t.core.invoices.pending_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn award_lifecycle_delivery_is_operator_only_and_refund_wins() -> Result<()> {
    let t = wired();

    let invoice = t.core.payments.request_roll_invoice(7).await?;
    let outcome = t
        .core
        .payments
        .on_payment_confirmed(confirmed("ch_life", &invoice.token, 1))
        .await?;
    let SettlementOutcome::Rolled { award } = outcome else {
        bail!("expected a roll outcome");
    };

    assert!(matches!(
        t.core
            .payments
            .mark_award_delivered(7, &award.tracking_code)
            .await,
        Err(PaymentError::NotOwner(_))
    ));
    let delivered = t
        .core
        .payments
        .mark_award_delivered(99, &award.tracking_code)
        .await?;
    assert_eq!(delivered.status, AwardStatus::Delivered);
    t.core
        .payments
        .mark_award_delivered(99, &award.tracking_code)
        .await
        .context("delivery replay is accepted")?;

    let receipt = t.core.refunds.refund(7, "ch_life").await?;
    assert_eq!(receipt.amount, 1);
    assert_eq!(t.core.ledger.balance_of(7).await, 0);
    assert!(matches!(
        t.core
            .payments
            .mark_award_delivered(99, &award.tracking_code)
            .await,
        Err(PaymentError::AlreadyRefunded(_))
    ));
    Ok(())
}

#[tokio::test]
async fn invoice_and_refund_flow_through_the_http_gateway() -> Result<()> {
    let stub = spawn_gateway_stub("secret".to_string()).await?;
    let gateway = Arc::new(HttpPaymentGateway::new(
        stub.base_url.clone(),
        "secret".to_string(),
        2_000,
    ));
    let core = build_core_with(test_config(), gateway, notify::memory());

    let invoice = core.payments.request_roll_invoice(3).await?;
    assert!(invoice.invoice_id.starts_with("inv_stub_"));
    assert_eq!(invoice.url.as_deref(), Some("https://t.me/invoice/stub"));

    let outcome = core
        .payments
        .on_payment_confirmed(confirmed("ch_http", &invoice.token, 1))
        .await?;
    assert!(matches!(outcome, SettlementOutcome::Rolled { .. }));
    assert_eq!(core.ledger.balance_of(3).await, 1);

    core.refunds.refund(3, "ch_http").await?;
    assert_eq!(core.ledger.balance_of(3).await, 0);

    assert_eq!(stub.invoice_calls.load(Ordering::Relaxed), 1);
    assert_eq!(stub.refund_calls.load(Ordering::Relaxed), 1);
    let _ = stub.shutdown.send(());
    Ok(())
}

#[derive(Clone)]
struct StubState {
    auth_token: String,
    invoice_calls: Arc<AtomicU64>,
    refund_calls: Arc<AtomicU64>,
}

struct StubHandle {
    base_url: String,
    invoice_calls: Arc<AtomicU64>,
    refund_calls: Arc<AtomicU64>,
    shutdown: oneshot::Sender<()>,
}

async fn spawn_gateway_stub(auth_token: String) -> Result<StubHandle> {
    let state = StubState {
        auth_token,
        invoice_calls: Arc::new(AtomicU64::new(0)),
        refund_calls: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/invoices", post(create_invoice))
        .route("/refunds", post(refund_payment))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });

    Ok(StubHandle {
        base_url: format!("http://{addr}"),
        invoice_calls: state.invoice_calls.clone(),
        refund_calls: state.refund_calls.clone(),
        shutdown: shutdown_tx,
    })
}

fn authorized(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == format!("Bearer {token}"))
        .unwrap_or(false)
}

async fn create_invoice(
    headers: HeaderMap,
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &state.auth_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": {"code": "unauthorized"}})),
        );
    }
    if body.get("token").and_then(Value::as_str).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": {"code": "missing_token"}})),
        );
    }
    let n = state.invoice_calls.fetch_add(1, Ordering::Relaxed) + 1;
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "result": {
                "invoiceId": format!("inv_stub_{n}"),
                "url": "https://t.me/invoice/stub"
            }
        })),
    )
}

async fn refund_payment(
    headers: HeaderMap,
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers, &state.auth_token) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": {"code": "unauthorized"}})),
        );
    }
    if body.get("chargeId").and_then(Value::as_str).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": {"code": "missing_charge_id"}})),
        );
    }
    state.refund_calls.fetch_add(1, Ordering::Relaxed);
    (
        StatusCode::OK,
        Json(json!({"ok": true, "result": {"refunded": true}})),
    )
}
