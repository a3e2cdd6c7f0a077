use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, endpoint};
use super::parcel::{require_positive, require_text};
use crate::dispatch::{AdapterError, ProviderAdapter};

const PROVIDER: &str = "paypal";

#[derive(Debug, Clone, Deserialize)]
pub struct PaypalPayment {
    pub client_id: String,
    pub client_secret: String,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-credentials token, then a sale payment with that token.
pub struct PaypalAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl PaypalAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn access_token(&self, payment: &PaypalPayment) -> Result<String, AdapterError> {
        let request = self
            .client
            .post(endpoint(&self.base_url, "/v1/oauth2/token"))
            .basic_auth(&payment.client_id, Some(&payment.client_secret))
            .header(ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")]);

        let body = http::send(PROVIDER, request)
            .await
            .map_err(|e| AdapterError::Auth(e.to_string()))?;

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| AdapterError::Auth(format!("unreadable token response: {e}")))?;
        Ok(token.access_token)
    }
}

pub(crate) fn payment_body(payment: &PaypalPayment) -> Value {
    json!({
        "intent": "sale",
        "payer": { "payment_method": "credit_card" },
        "transactions": [{
            "amount": {
                "total": format!("{:.2}", payment.amount),
                "currency": payment.currency,
            },
            "description": "Payment for product",
        }],
    })
}

#[async_trait]
impl ProviderAdapter for PaypalAdapter {
    type Request = PaypalPayment;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn validate(&self, payment: &PaypalPayment) -> Result<(), String> {
        require_text("client_id", &payment.client_id)?;
        require_text("currency", &payment.currency)?;
        require_positive("amount", payment.amount)
    }

    async fn call(&self, payment: PaypalPayment) -> Result<Vec<u8>, AdapterError> {
        let token = self.access_token(&payment).await?;

        let request = self
            .client
            .post(endpoint(&self.base_url, "/v1/payments/payment"))
            .bearer_auth(token)
            .json(&payment_body(&payment));

        http::send(PROVIDER, request).await
    }
}
