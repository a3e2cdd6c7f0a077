use serde_json::error::Category;
use std::any::Any;
use std::time::Duration;

use super::adapter::AdapterError;
use crate::messaging::Response;

/// Everything that can go wrong while handling one message. Each variant is
/// local to that message: it becomes an error envelope and the delivery is
/// still acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("{provider} call timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("unexpected fault: {0}")]
    Fault(String),
}

impl ProcessError {
    /// Syntax errors mean the body is not JSON at all; data errors mean it
    /// is JSON but not the request the provider expects.
    pub fn from_decode(error: serde_json::Error) -> Self {
        match error.classify() {
            Category::Data => ProcessError::Invalid(error.to_string()),
            Category::Syntax | Category::Eof | Category::Io => {
                ProcessError::Malformed(error.to_string())
            }
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        ProcessError::Fault(message)
    }

    /// Label used for the `adapter_failures_total` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessError::Malformed(_) => "malformed",
            ProcessError::Invalid(_) => "invalid",
            ProcessError::Adapter(error) => error.reason(),
            ProcessError::Timeout { .. } => "timeout",
            ProcessError::CircuitOpen(_) => "circuit_open",
            ProcessError::Fault(_) => "fault",
        }
    }

    /// Failures that count against the provider's circuit breaker.
    pub fn is_provider_fault(&self) -> bool {
        match self {
            ProcessError::Adapter(error) => error.is_provider_fault(),
            ProcessError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.to_string())
    }
}
