use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Message Envelopes
// ============================================================================
//
// Requests are JSON objects. Routers only ever look at one discriminator
// field; workers decode the whole object into a provider-specific type.
//
// Responses are either `{"status":"success", ...}` or
// `{"status":"error","message":"..."}`. Successful worker responses are the
// provider's raw body and never pass through `Response`.
//
// ============================================================================

/// Decoded request object as seen by a router.
pub type RequestFields = Map<String, Value>;

/// Decode a message body as a JSON object.
pub fn decode_request(body: &[u8]) -> Result<RequestFields, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Response envelope published to output queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Success {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl Response {
    /// Success acknowledgment carrying a single key, e.g. `{"gateway":"paypal"}`.
    pub fn success(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(key.into(), value.into());
        Response::Success { fields }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            Response::Success { .. } => "success",
            Response::Error { .. } => "error",
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Response::Success { fields } => {
                let mut object = Map::with_capacity(fields.len() + 1);
                object.insert("status".to_string(), Value::from("success"));
                object.extend(fields);
                Value::Object(object)
            }
            Response::Error { message } => {
                serde_json::json!({ "status": "error", "message": message })
            }
        }
    }

    /// Wire encoding of the envelope.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.clone().into_value().to_string().into_bytes()
    }

    /// Parse a response envelope, mostly useful to downstream consumers and tests.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
