use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, endpoint};
use super::parcel::{require_text, Parcel};
use crate::dispatch::{AdapterError, ProviderAdapter};

const PROVIDER: &str = "dhl";

#[derive(Debug, Clone, Deserialize)]
pub struct DhlQuoteRequest {
    pub api_key: String,
    #[serde(flatten)]
    pub parcel: Parcel,
}

pub struct DhlAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl DhlAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

pub(crate) fn quote_body(parcel: &Parcel) -> Value {
    json!({
        "weight": parcel.weight,
        "dimensions": {
            "length": parcel.length,
            "width": parcel.width,
            "height": parcel.height,
        },
        "origin": { "country": parcel.origin_country },
        "destination": { "country": parcel.destination_country },
    })
}

#[async_trait]
impl ProviderAdapter for DhlAdapter {
    type Request = DhlQuoteRequest;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn validate(&self, request: &DhlQuoteRequest) -> Result<(), String> {
        require_text("api_key", &request.api_key)?;
        request.parcel.validate()
    }

    async fn call(&self, request: DhlQuoteRequest) -> Result<Vec<u8>, AdapterError> {
        let http_request = self
            .client
            .post(endpoint(&self.base_url, "/mydhlapi/shipments/v1/quotes"))
            .bearer_auth(&request.api_key)
            .json(&quote_body(&request.parcel));

        http::send(PROVIDER, http_request).await
    }
}
