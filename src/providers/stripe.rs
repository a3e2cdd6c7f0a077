use async_trait::async_trait;
use serde::Deserialize;

use super::http::{self, endpoint};
use super::parcel::{require_positive, require_text};
use crate::dispatch::{AdapterError, ProviderAdapter};

const PROVIDER: &str = "stripe";

#[derive(Debug, Clone, Deserialize)]
pub struct StripePayment {
    pub secret_key: String,
    pub amount: f64,
    pub currency: String,
}

/// Creates a Checkout Session for a single line item.
pub struct StripeAdapter {
    client: reqwest::Client,
    base_url: String,
    success_url: String,
    cancel_url: String,
}

impl StripeAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    /// Form fields in Stripe's bracket notation. Amounts are sent in
    /// the currency's minor unit.
    pub(crate) fn session_form(&self, payment: &StripePayment) -> Vec<(&'static str, String)> {
        vec![
            ("payment_method_types[0]", "card".to_string()),
            ("line_items[0][price_data][currency]", payment.currency.clone()),
            ("line_items[0][price_data][product_data][name]", "Product".to_string()),
            ("line_items[0][price_data][unit_amount]", to_cents(payment.amount).to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("mode", "payment".to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
        ]
    }
}

fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    type Request = StripePayment;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn validate(&self, payment: &StripePayment) -> Result<(), String> {
        require_text("secret_key", &payment.secret_key)?;
        require_text("currency", &payment.currency)?;
        require_positive("amount", payment.amount)
    }

    async fn call(&self, payment: StripePayment) -> Result<Vec<u8>, AdapterError> {
        let request = self
            .client
            .post(endpoint(&self.base_url, "/v1/checkout/sessions"))
            .bearer_auth(&payment.secret_key)
            .form(&self.session_form(&payment));

        http::send(PROVIDER, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub;

    fn adapter(base_url: &str) -> StripeAdapter {
        StripeAdapter::new(
            http::build_client().unwrap(),
            base_url,
            "https://shop.test/success",
            "https://shop.test/cancel",
        )
    }

    fn payment(amount: f64) -> StripePayment {
        StripePayment {
            secret_key: "sk_test_123".to_string(),
            amount,
            currency: "usd".to_string(),
        }
    }

    #[test]
    fn test_amount_in_cents() {
        assert_eq!(to_cents(10.0), 1000);
        assert_eq!(to_cents(19.99), 1999);
        assert_eq!(to_cents(0.1 + 0.2), 30);
    }

    #[test]
    fn test_session_form() {
        let form = adapter("http://127.0.0.1:1").session_form(&payment(12.34));
        let field = |name: &str| {
            form.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };

        assert_eq!(field("line_items[0][price_data][unit_amount]"), "1234");
        assert_eq!(field("line_items[0][price_data][currency]"), "usd");
        assert_eq!(field("mode"), "payment");
        assert_eq!(field("success_url"), "https://shop.test/success");
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let (base_url, server) = stub::serve(vec![(402, r#"{"error":{"message":"card declined"}}"#)]).await;

        let result = adapter(&base_url).call(payment(5.0)).await;
        match result {
            Err(AdapterError::Status { provider, status, body }) => {
                assert_eq!(provider, "stripe");
                assert_eq!(status, 402);
                assert!(body.contains("card declined"));
            }
            other => panic!("expected status error, got {other:?}"),
        }

        let requests = server.await.unwrap();
        assert_eq!(requests[0].header("authorization").unwrap(), "Bearer sk_test_123");
        assert!(requests[0].body.contains("mode=payment"));
    }
}
