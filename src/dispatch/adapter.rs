use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Failure of a single provider call. Always answered with an error
/// envelope, never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("{provider} request failed: {reason}")]
    Transport { provider: String, reason: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("token unavailable: {0}")]
    Auth(String),

    #[error("{provider} returned an invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl AdapterError {
    /// Label used for the `adapter_failures_total` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AdapterError::Transport { .. } => "transport",
            AdapterError::Status { .. } => "status",
            AdapterError::Auth(_) => "auth",
            AdapterError::InvalidResponse { .. } => "invalid_response",
        }
    }

    /// Unreachable provider or a 5xx. Rejected credentials and other 4xx
    /// answers describe the request, not the provider.
    pub fn is_provider_fault(&self) -> bool {
        match self {
            AdapterError::Transport { .. } => true,
            AdapterError::Status { status, .. } => *status >= 500,
            AdapterError::Auth(_) | AdapterError::InvalidResponse { .. } => false,
        }
    }
}

/// One external provider behind a worker.
///
/// `Request` is decoded straight from the message body, so every field the
/// adapter relies on is checked by deserialization. `validate` covers the
/// rules serde cannot express (positive amounts, non-empty codes). `call`
/// performs exactly one outbound request and returns the provider's raw
/// response body.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;

    fn provider(&self) -> &str;

    fn validate(&self, _request: &Self::Request) -> Result<(), String> {
        Ok(())
    }

    async fn call(&self, request: Self::Request) -> Result<Vec<u8>, AdapterError>;
}
