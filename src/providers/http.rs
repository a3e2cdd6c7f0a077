use std::time::Duration;

use crate::dispatch::AdapterError;

/// Upper bound on the provider body quoted in an error envelope.
const MAX_ERROR_BODY: usize = 512;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by every adapter of a process. It sets no overall
/// request timeout: each worker bounds its calls with its own
/// `adapter_timeout`.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("provider_relay/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Join a configured base URL and an API path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn transport(provider: &str, error: reqwest::Error) -> AdapterError {
    AdapterError::Transport {
        provider: provider.to_string(),
        reason: error.to_string(),
    }
}

/// Send a prepared request and return the raw body of a 2xx answer.
pub(crate) async fn send(provider: &str, request: reqwest::RequestBuilder) -> Result<Vec<u8>, AdapterError> {
    let response = request.send().await.map_err(|e| transport(provider, e))?;
    let status = response.status();
    let body = response.bytes().await.map_err(|e| transport(provider, e))?;

    if !status.is_success() {
        return Err(AdapterError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate(&String::from_utf8_lossy(&body), MAX_ERROR_BODY),
        });
    }

    tracing::debug!(provider = %provider, status = status.as_u16(), bytes = body.len(), "Provider responded");
    Ok(body.to_vec())
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.stripe.com/", "/v1/checkout/sessions"),
            "https://api.stripe.com/v1/checkout/sessions"
        );
        assert_eq!(endpoint("http://127.0.0.1:8080", "rest/Rate"), "http://127.0.0.1:8080/rest/Rate");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate("aéb", 2), "a...");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = build_client().unwrap();
        let result = send("ups", client.get("http://127.0.0.1:1/rest/Rate")).await;

        match result {
            Err(AdapterError::Transport { provider, .. }) => assert_eq!(provider, "ups"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
