//! Callback Dispatcher (spec §4.F): best-effort, at-least-once delivery of
//! the final [`crate::request::ExecutionResult`] to a caller-provided URL.

use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use crate::security::mask_query_params;

const TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFFS: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// A destination whose hostname matches `hostname_contains` is only
/// delivered when `enabled` is true; otherwise the dispatcher no-ops and
/// logs an informational record (spec §4.F "Feature-gated destinations").
#[derive(Debug, Clone)]
pub struct FeatureGate {
    pub hostname_contains: String,
    pub enabled: bool,
}

/// Delivers JSON payloads to webhook callback URLs with bounded retries.
pub struct CallbackDispatcher {
    client: Client,
    webhook_secret: Option<String>,
    feature_gates: Vec<FeatureGate>,
}

impl CallbackDispatcher {
    pub fn new(webhook_secret: Option<String>, feature_gates: Vec<FeatureGate>) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(8)
            .timeout(TIMEOUT)
            .build()
            .expect("callback HTTP client configuration is static and always valid");
        Self { client, webhook_secret, feature_gates }
    }

    /// Deliver `payload` to `url`, signing with the configured webhook
    /// secret and retrying with exponential backoff. Never returns an
    /// error to the caller: failures are logged and dropped (spec §4.F
    /// "Failure semantics").
    pub async fn deliver(&self, url: &str, request_id: &str, payload: &serde_json::Value) {
        if let Some(gate) = self.feature_gates.iter().find(|g| url.contains(&g.hostname_contains)) {
            if !gate.enabled {
                info!(
                    request_id,
                    url = %mask_query_params(url),
                    "callback destination feature-gated off, skipping delivery"
                );
                return;
            }
        }

        let signed_url = self.sign(url);
        let masked = mask_query_params(&signed_url);

        for (attempt, backoff) in std::iter::once(None).chain(RETRY_BACKOFFS.into_iter().map(Some)).enumerate() {
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&signed_url).json(payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(request_id, url = %masked, attempt, "callback delivered");
                    return;
                }
                Ok(response) => {
                    warn!(request_id, url = %masked, attempt, status = %response.status(), "callback rejected");
                }
                Err(err) => {
                    warn!(request_id, url = %masked, attempt, error = %err, "callback request failed");
                }
            }
        }

        warn!(request_id, url = %masked, "callback delivery exhausted retries, dropping");
    }

    fn sign(&self, url: &str) -> String {
        let Some(secret) = &self.webhook_secret else {
            return url.to_string();
        };
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{url}{separator}secret={secret}")
    }
}
