//! HTTP delivery client for the downstream webhook.
//!
//! [`HttpTransport`] issues one `POST` with a JSON body per call over a shared,
//! connection-pooling `reqwest::Client`. [`DeliveryClient`] adds the retry
//! policy and emits one log line per attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::{AttemptOutcome, DeliveryReport, WebhookError, WebhookTransport};
use crate::relay::normalize::DeliveryRecord;

/// Request timeout applied when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// reqwest-backed transport posting JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    /// Build a transport for `url` with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Client`] if the HTTP client cannot be built.
    pub fn new(
        url: Url,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("telehook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, url })
    }

    /// Build a transport with the default 30 second request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Client`] if the HTTP client cannot be built.
    pub fn with_defaults(url: Url) -> Result<Self, WebhookError> {
        Self::new(url, DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, record: &DeliveryRecord) -> AttemptOutcome {
        let sent = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(record)
            .send()
            .await;

        match sent {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status == 200 {
                    return AttemptOutcome::Success { status };
                }
                let body = resp.text().await.unwrap_or_default();
                AttemptOutcome::from_status(status, &body)
            }
            Err(e) => classify_request_error(&e),
        }
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

/// Map a reqwest error onto the attempt taxonomy.
fn classify_request_error(e: &reqwest::Error) -> AttemptOutcome {
    if e.is_timeout() {
        AttemptOutcome::Timeout
    } else if e.is_connect() {
        AttemptOutcome::ConnectionError(e.to_string())
    } else {
        AttemptOutcome::RequestError(e.to_string())
    }
}

/// Delivers records with a bounded retry policy.
///
/// Cheap to clone; clones share the transport and its connection pool.
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn WebhookTransport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("endpoint", &self.transport.endpoint())
            .field("policy", &self.policy)
            .finish()
    }
}

impl DeliveryClient {
    /// Wrap a transport with a retry policy.
    pub fn new(transport: Arc<dyn WebhookTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Deliver one record, retrying transient failures.
    ///
    /// Emits exactly one log line per attempt: `info` on success, `error` for
    /// every failed attempt. Retried attempts carry `backoff_ms`.
    pub async fn deliver(&self, record: &DeliveryRecord) -> DeliveryReport {
        let delivery_id = Uuid::new_v4();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let outcome = self.transport.post(record).await;

            if outcome.is_success() {
                info!(
                    %delivery_id,
                    chat_id = record.chat_id,
                    message_id = record.message_id,
                    attempt,
                    status = outcome.status(),
                    outcome = outcome.label(),
                    "successfully sent to webhook: {outcome}"
                );
                return DeliveryReport {
                    attempts: attempt,
                    last: outcome,
                };
            }

            if self.policy.should_retry(attempt, &outcome) {
                let backoff = self.policy.delay_after(attempt);
                error!(
                    %delivery_id,
                    chat_id = record.chat_id,
                    message_id = record.message_id,
                    attempt,
                    status = outcome.status(),
                    outcome = outcome.label(),
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "webhook delivery failed, retrying: {outcome}"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            error!(
                %delivery_id,
                chat_id = record.chat_id,
                message_id = record.message_id,
                attempt,
                status = outcome.status(),
                outcome = outcome.label(),
                "webhook delivery failed, dropping message: {outcome}"
            );
            return DeliveryReport {
                attempts: attempt,
                last: outcome,
            };
        }
    }
}
