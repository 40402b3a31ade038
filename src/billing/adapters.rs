use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::config;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("provider response missing `{0}`")]
    MalformedResponse(&'static str),
}

#[derive(Debug, Clone)]
pub struct InvoiceItemRequest {
    pub customer_ref: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    /// Keyed by schedule id so a retried call cannot create a second item.
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_ref: String,
    /// None refunds whatever remains on the payment.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

/// key: billing-adapter -> payment provider integration
///
/// All I/O toward the payment provider goes through this trait; the returned
/// identifiers are persisted on the schedule so later runs detect work
/// already done.
#[async_trait]
pub trait InvoicingProvider: Send + Sync {
    async fn create_invoice_item(&self, req: InvoiceItemRequest) -> Result<String, ProviderError>;
    async fn create_refund(&self, req: RefundRequest) -> Result<String, ProviderError>;
}

/// key: billing-adapter-stripe -> REST implementation
pub struct StripeInvoicingAdapter {
    base: String,
    secret_key: String,
    client: Client,
}

impl StripeInvoicingAdapter {
    pub fn from_env() -> Option<Self> {
        let key = config::STRIPE_SECRET_KEY.clone()?;
        Some(Self::new(config::STRIPE_API_BASE.clone(), key))
    }

    pub fn new(base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("client build"),
        }
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base, path);
        let mut req = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(params);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown provider error")
                .to_string();
            return Err(ProviderError::Rejected(message));
        }
        Ok(body)
    }
}

fn extract_id(body: &Value) -> Result<String, ProviderError> {
    body.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(ProviderError::MalformedResponse("id"))
}

#[async_trait]
impl InvoicingProvider for StripeInvoicingAdapter {
    async fn create_invoice_item(&self, req: InvoiceItemRequest) -> Result<String, ProviderError> {
        let params = [
            ("customer", req.customer_ref),
            ("amount", req.amount.to_string()),
            ("currency", req.currency),
            ("description", req.description),
        ];
        let body = self
            .post_form("/v1/invoiceitems", &params, Some(&req.idempotency_key))
            .await?;
        extract_id(&body)
    }

    async fn create_refund(&self, req: RefundRequest) -> Result<String, ProviderError> {
        let mut params = vec![("payment_intent", req.payment_ref)];
        if let Some(amount) = req.amount {
            params.push(("amount", amount.to_string()));
        }
        if let Some(reason) = req.reason {
            params.push(("reason", reason));
        }
        let body = self.post_form("/v1/refunds", &params, None).await?;
        extract_id(&body)
    }
}
