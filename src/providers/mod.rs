// ============================================================================
// Provider Adapters
// ============================================================================
//
// One `ProviderAdapter` per external API. Each adapter decodes its own
// request type, validates it, performs a single HTTPS call through a shared
// `reqwest::Client` and hands back the provider's raw response body.
//
// ============================================================================

mod dhl;
mod fedex;
pub mod http;
mod parcel;
mod paypal;
mod stripe;
mod ups;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use dhl::{DhlAdapter, DhlQuoteRequest};
pub use fedex::{FedexAdapter, FedexRateRequest};
pub use parcel::Parcel;
pub use paypal::{PaypalAdapter, PaypalPayment};
pub use stripe::{StripeAdapter, StripePayment};
pub use ups::{UpsAdapter, UpsRateRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Paypal,
    Stripe,
    Ups,
    Fedex,
    Dhl,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Paypal => "paypal",
            ProviderKind::Stripe => "stripe",
            ProviderKind::Ups => "ups",
            ProviderKind::Fedex => "fedex",
            ProviderKind::Dhl => "dhl",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
