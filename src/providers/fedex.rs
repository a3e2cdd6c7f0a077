use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, endpoint};
use super::parcel::{require_text, Parcel};
use crate::dispatch::{AdapterError, ProviderAdapter};

const PROVIDER: &str = "fedex";

#[derive(Debug, Clone, Deserialize)]
pub struct FedexRateRequest {
    pub access_key: String,
    /// Required with every request, though the quote body does not carry it.
    pub meter_number: String,
    #[serde(flatten)]
    pub parcel: Parcel,
}

pub struct FedexAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl FedexAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

pub(crate) fn quote_body(parcel: &Parcel) -> Value {
    json!({
        "version": { "serviceId": "rate", "major": 1, "minor": 0 },
        "requestedShipment": {
            "shipper": { "address": { "countryCode": parcel.origin_country } },
            "recipient": { "address": { "countryCode": parcel.destination_country } },
            "packageCount": 1,
            "requestedPackageLineItems": [{
                "weight": { "value": parcel.weight },
                "dimensions": {
                    "length": parcel.length,
                    "width": parcel.width,
                    "height": parcel.height,
                },
            }],
        },
    })
}

#[async_trait]
impl ProviderAdapter for FedexAdapter {
    type Request = FedexRateRequest;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn validate(&self, request: &FedexRateRequest) -> Result<(), String> {
        require_text("access_key", &request.access_key)?;
        require_text("meter_number", &request.meter_number)?;
        request.parcel.validate()
    }

    async fn call(&self, request: FedexRateRequest) -> Result<Vec<u8>, AdapterError> {
        let http_request = self
            .client
            .post(endpoint(&self.base_url, "/rate/v1/rates/quotes"))
            .bearer_auth(&request.access_key)
            .json(&quote_body(&request.parcel));

        http::send(PROVIDER, http_request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::parcel::sample;
    use crate::providers::stub;

    #[test]
    fn test_quote_body() {
        let body = quote_body(&sample());
        assert_eq!(body["version"]["serviceId"], "rate");
        assert_eq!(body["requestedShipment"]["packageCount"], 1);

        let item = &body["requestedShipment"]["requestedPackageLineItems"][0];
        assert_eq!(item["weight"]["value"], 2.5);
        assert_eq!(item["dimensions"]["width"], 20.0);
    }

    #[test]
    fn test_missing_access_key_is_rejected_by_validation() {
        let fedex = FedexAdapter::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let request = FedexRateRequest {
            access_key: String::new(),
            meter_number: "123".to_string(),
            parcel: sample(),
        };
        assert_eq!(fedex.validate(&request).unwrap_err(), "access_key must not be empty");
    }

    #[test]
    fn test_meter_number_is_required() {
        let mut body = json!({
            "access_key": "bearer-token",
            "origin_country": "US",
            "destination_country": "IT",
            "weight": 2.5,
            "length": 30,
            "width": 20,
            "height": 10,
        });

        let error = serde_json::from_value::<FedexRateRequest>(body.clone()).unwrap_err();
        assert!(error.to_string().contains("meter_number"));

        body["meter_number"] = json!("510087");
        let request: FedexRateRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.meter_number, "510087");
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status() {
        let (base_url, server) = stub::serve(vec![(503, "upstream unavailable")]).await;
        let fedex = FedexAdapter::new(http::build_client().unwrap(), base_url);

        let request = FedexRateRequest {
            access_key: "bearer-token".to_string(),
            meter_number: "123".to_string(),
            parcel: sample(),
        };
        let error = fedex.call(request).await.unwrap_err();
        assert_eq!(error.to_string(), "fedex returned HTTP 503: upstream unavailable");

        let requests = server.await.unwrap();
        assert_eq!(requests[0].header("authorization").unwrap(), "Bearer bearer-token");
    }
}
