use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{self, endpoint};
use super::parcel::{require_text, Parcel};
use crate::dispatch::{AdapterError, ProviderAdapter};

const PROVIDER: &str = "ups";

/// Package type "02": customer supplied package.
const PACKAGING_CODE: &str = "02";

#[derive(Debug, Clone, Deserialize)]
pub struct UpsRateRequest {
    pub access_key: String,
    pub user_id: String,
    pub password: String,
    #[serde(flatten)]
    pub parcel: Parcel,
}

/// Rating API; credentials travel in the request body.
pub struct UpsAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl UpsAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

pub(crate) fn rate_body(request: &UpsRateRequest) -> Value {
    let parcel = &request.parcel;
    json!({
        "AccessRequest": {
            "AccessLicenseNumber": request.access_key,
            "UserId": request.user_id,
            "Password": request.password,
        },
        "RateRequest": {
            "Shipment": {
                "Shipper": { "Address": { "CountryCode": parcel.origin_country } },
                "ShipTo": { "Address": { "CountryCode": parcel.destination_country } },
                "Package": [{
                    "PackagingType": { "Code": PACKAGING_CODE },
                    "Dimensions": {
                        "Length": parcel.length,
                        "Width": parcel.width,
                        "Height": parcel.height,
                    },
                    "PackageWeight": {
                        "UnitOfMeasurement": { "Code": "LBS" },
                        "Weight": parcel.weight,
                    },
                }],
            },
        },
    })
}

#[async_trait]
impl ProviderAdapter for UpsAdapter {
    type Request = UpsRateRequest;

    fn provider(&self) -> &str {
        PROVIDER
    }

    fn validate(&self, request: &UpsRateRequest) -> Result<(), String> {
        require_text("access_key", &request.access_key)?;
        request.parcel.validate()
    }

    async fn call(&self, request: UpsRateRequest) -> Result<Vec<u8>, AdapterError> {
        let http_request = self
            .client
            .post(endpoint(&self.base_url, "/rest/Rate"))
            .json(&rate_body(&request));

        http::send(PROVIDER, http_request).await
    }
}
