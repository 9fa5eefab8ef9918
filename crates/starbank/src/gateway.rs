use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ledger::UserId;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("gateway transport error: {0}")]
    Transport(String),
}

#[derive(Clone, Debug)]
pub struct CreateInvoiceRequest {
    pub title: String,
    pub description: String,
    pub token: String,
    pub currency: String,
    pub unit_price: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayInvoice {
    pub invoice_id: String,
    pub url: Option<String>,
}

/// Outbound interface to the external payment gateway. The gateway is the
/// system that actually collects money; this crate only asks it to issue
/// invoices and to reverse completed charges.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<GatewayInvoice, GatewayError>;

    async fn refund_payment(&self, user_id: UserId, charge_id: &str)
    -> Result<(), GatewayError>;
}

/// HTTP gateway client. POSTs JSON to `{base_url}/invoices` and
/// `{base_url}/refunds` with a bearer token and a bounded per-request
/// timeout.
pub struct HttpPaymentGateway {
    base_url: String,
    auth_token: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, auth_token: String, timeout_ms: u64) -> Self {
        Self {
            base_url,
            auth_token,
            timeout: Duration::from_millis(timeout_ms.clamp(250, 120_000)),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn rejected_from(json: &Value, status: reqwest::StatusCode) -> GatewayError {
        let code = json
            .pointer("/error/code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("http_{}", status.as_u16()));
        let message = json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "payment gateway error".to_string());
        GatewayError::Rejected { code, message }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<GatewayInvoice, GatewayError> {
        let url = self.endpoint("invoices");
        let resp = self
            .http
            .post(url.as_str())
            .timeout(self.timeout)
            .header("authorization", format!("Bearer {}", self.auth_token))
            .json(&json!({
                "title": request.title,
                "description": request.description,
                "token": request.token,
                "currency": request.currency,
                "unitPrice": request.unit_price,
            }))
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        let status = resp.status();
        let json = resp.json::<Value>().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(Self::rejected_from(&json, status));
        }

        let invoice_id = json
            .pointer("/result/invoiceId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Rejected {
                code: "malformed_response".to_string(),
                message: "invoice response missing result.invoiceId".to_string(),
            })?;
        let url = json
            .pointer("/result/url")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(GatewayInvoice { invoice_id, url })
    }

    async fn refund_payment(
        &self,
        user_id: UserId,
        charge_id: &str,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint("refunds");
        let resp = self
            .http
            .post(url.as_str())
            .timeout(self.timeout)
            .header("authorization", format!("Bearer {}", self.auth_token))
            .json(&json!({
                "userId": user_id,
                "chargeId": charge_id,
            }))
            .send()
            .await
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let json = resp.json::<Value>().await.unwrap_or(Value::Null);
        Err(Self::rejected_from(&json, status))
    }
}

/// In-memory gateway for local runs and tests: records every call and can
/// be told to fail, so callers can assert both sides of the contract.
#[derive(Default)]
pub struct MemoryPaymentGateway {
    invoices: Mutex<Vec<CreateInvoiceRequest>>,
    refunds: Mutex<Vec<(UserId, String)>>,
    invoice_calls: AtomicU64,
    refund_calls: AtomicU64,
    fail_invoices: AtomicBool,
    fail_refunds: AtomicBool,
}

pub fn memory() -> Arc<MemoryPaymentGateway> {
    Arc::new(MemoryPaymentGateway::default())
}

impl MemoryPaymentGateway {
    pub fn fail_invoices(&self, fail: bool) {
        self.fail_invoices.store(fail, Ordering::Relaxed);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::Relaxed);
    }

    pub fn invoice_calls(&self) -> u64 {
        self.invoice_calls.load(Ordering::Relaxed)
    }

    pub fn refund_calls(&self) -> u64 {
        self.refund_calls.load(Ordering::Relaxed)
    }

    pub async fn issued_invoices(&self) -> Vec<CreateInvoiceRequest> {
        let invoices = self.invoices.lock().await;
        invoices.clone()
    }

    pub async fn issued_refunds(&self) -> Vec<(UserId, String)> {
        let refunds = self.refunds.lock().await;
        refunds.clone()
    }
}

#[async_trait]
impl PaymentGateway for MemoryPaymentGateway {
    async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
    ) -> Result<GatewayInvoice, GatewayError> {
        self.invoice_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_invoices.load(Ordering::Relaxed) {
            return Err(GatewayError::Rejected {
                code: "forced_failure".to_string(),
                message: "invoice creation disabled".to_string(),
            });
        }
        let mut invoices = self.invoices.lock().await;
        invoices.push(request);
        Ok(GatewayInvoice {
            invoice_id: format!("inv_{}", Uuid::new_v4().simple()),
            url: None,
        })
    }

    async fn refund_payment(
        &self,
        user_id: UserId,
        charge_id: &str,
    ) -> Result<(), GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_refunds.load(Ordering::Relaxed) {
            return Err(GatewayError::Rejected {
                code: "forced_failure".to_string(),
                message: "refunds disabled".to_string(),
            });
        }
        let mut refunds = self.refunds.lock().await;
        refunds.push((user_id, charge_id.to_string()));
        Ok(())
    }
}
