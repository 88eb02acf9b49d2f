//! Fleet API execution of approved requests.
//!
//! The executor is the external-collaborator boundary: templates decide
//! method and endpoint, approval decides *whether*, this client decides
//! *how* — authentication, TLS policy, and a small retry budget
//! (3 attempts, 2 s backoff).

use std::time::Duration;

use reqwest::{Client, Method};

use fleetmind_core::config::{AuthMode, FleetApiConfig};
use fleetmind_core::CoreError;

/// Credentials matching the configured auth mode.
#[derive(Debug, Clone)]
pub enum AuthCredentials {
    /// Session cookie value.
    Cookie(String),
    /// Bearer token.
    Bearer(String),
    /// OAuth access token.
    OAuth(String),
    /// API key sent as `X-API-Key`.
    ApiKey(String),
    /// No authentication.
    None,
}

/// Outcome of one executed request.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// HTTP status code.
    pub status: u16,
    /// Response body, parsed as JSON when possible.
    pub body: serde_json::Value,
}

impl ExecutionOutcome {
    /// Whether the fleet API accepted the request.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client for the fleet management API.
pub struct FleetApiClient {
    client: Client,
    config: FleetApiConfig,
    credentials: AuthCredentials,
}

impl FleetApiClient {
    /// Build a client from configuration and credentials.
    pub fn new(config: FleetApiConfig, credentials: AuthCredentials) -> Result<Self, CoreError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5));

        if !config.verify_ssl {
            tracing::warn!(target: "fleetmind::executor", "TLS verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| CoreError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    /// Execute one request against the fleet API.
    ///
    /// Retries transport failures up to the configured budget with a
    /// fixed backoff; HTTP error statuses are returned, not retried.
    pub async fn execute(
        &self,
        method: &str,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<ExecutionOutcome, CoreError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| CoreError::internal(format!("invalid HTTP method: {method}")))?;
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );

        let mut last_error = None;
        for attempt in 1..=self.config.retry_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(Duration::from_secs(self.config.retry_backoff_secs)).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            request = self.apply_auth(request);
            if !body.is_null() {
                request = request.json(&strip_meta(body));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response.text().await.unwrap_or_default();
                    let body = serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text));
                    tracing::info!(target: "fleetmind::executor", %url, status, attempt, "fleet API call completed");
                    return Ok(ExecutionOutcome { status, body });
                }
                Err(e) => {
                    tracing::warn!(target: "fleetmind::executor", %url, attempt, error = %e, "fleet API call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(CoreError::Network(format!(
            "fleet API unreachable after {} attempts: {}",
            self.config.retry_attempts.max(1),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.config.auth_mode, &self.credentials) {
            (AuthMode::Cookie, AuthCredentials::Cookie(cookie)) => {
                request.header(reqwest::header::COOKIE, cookie)
            }
            (AuthMode::Bearer, AuthCredentials::Bearer(token))
            | (AuthMode::Oauth, AuthCredentials::OAuth(token)) => request.bearer_auth(token),
            (AuthMode::ApiKey, AuthCredentials::ApiKey(key)) => request.header("X-API-Key", key),
            _ => request,
        }
    }
}

/// The `_meta` provenance block stays local; it never goes on the wire.
fn strip_meta(body: &serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "_meta")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_meta() {
        let body = serde_json::json!({
            "resource_id": "RES-1234",
            "_meta": {"source": "user_input"},
        });
        let stripped = strip_meta(&body);
        assert!(stripped.get("_meta").is_none());
        assert_eq!(stripped["resource_id"], "RES-1234");
    }

    #[test]
    fn test_outcome_success_range() {
        let ok = ExecutionOutcome {
            status: 201,
            body: serde_json::Value::Null,
        };
        assert!(ok.is_success());
        let bad = ExecutionOutcome {
            status: 422,
            body: serde_json::Value::Null,
        };
        assert!(!bad.is_success());
    }

    #[tokio::test]
    async fn test_invalid_method_rejected() {
        let client =
            FleetApiClient::new(FleetApiConfig::default(), AuthCredentials::None).unwrap();
        let result = client
            .execute("NOT A METHOD", "/reservations", &serde_json::Value::Null)
            .await;
        assert!(result.is_err());
    }
}
