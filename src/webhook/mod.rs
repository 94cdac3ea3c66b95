//! Webhook delivery: outcome classification, transport seam, and retry.
//!
//! A [`WebhookTransport`] performs a single HTTP POST and classifies it as an
//! [`AttemptOutcome`]. The [`client::DeliveryClient`] wraps a transport in a
//! bounded [`retry::RetryPolicy`] and reports the final [`DeliveryReport`].

use std::fmt;

use async_trait::async_trait;
use regex::Regex;

use crate::relay::normalize::DeliveryRecord;

pub mod client;
pub mod retry;

pub use client::{DeliveryClient, HttpTransport};
pub use retry::RetryPolicy;

/// Maximum characters of a rejected response body kept for logging.
pub const MAX_LOGGED_BODY_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors building the webhook transport.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Classified result of one HTTP POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// HTTP 200.
    Success {
        /// Response status code.
        status: u16,
    },
    /// Any other HTTP status.
    Rejected {
        /// Response status code.
        status: u16,
        /// Sanitized, truncated response body.
        body: String,
    },
    /// No response within the request timeout.
    Timeout,
    /// Connecting to the endpoint failed.
    ConnectionError(String),
    /// Any other request failure (invalid request, body, redirect loop, ...).
    RequestError(String),
}

impl AttemptOutcome {
    /// Stable label used in structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Rejected { .. } => "rejected",
            Self::Timeout => "timeout",
            Self::ConnectionError(_) => "connection_error",
            Self::RequestError(_) => "other_request_error",
        }
    }

    /// Whether the attempt delivered the record.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether a later attempt may succeed.
    ///
    /// Timeouts, connection failures, 429 and 503 are transient; every other
    /// rejection is treated as final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionError(_) => true,
            Self::Rejected { status, .. } => matches!(status, 429 | 503),
            Self::Success { .. } | Self::RequestError(_) => false,
        }
    }

    /// HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status } | Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map an HTTP status and body to an outcome.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 200 {
            Self::Success { status }
        } else {
            Self::Rejected {
                status,
                body: sanitize_response_body(body),
            }
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { status } => write!(f, "HTTP {status}"),
            Self::Rejected { status, body } => write!(f, "HTTP {status} - {body}"),
            Self::Timeout => f.write_str("webhook did not respond before the timeout"),
            Self::ConnectionError(e) => write!(f, "failed to connect to webhook: {e}"),
            Self::RequestError(e) => write!(f, "webhook request error: {e}"),
        }
    }
}

/// Final disposition of a record after all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered with HTTP 200.
    Delivered,
    /// Rejected with a non-transient status; not retried.
    Rejected,
    /// Transient failures on every allowed attempt.
    TransientExhausted,
    /// Non-retryable request failure.
    Failed,
}

impl Disposition {
    /// Stable label used in structured logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
            Self::TransientExhausted => "transient_exhausted",
            Self::Failed => "failed",
        }
    }
}

/// Result of delivering one record, possibly over several attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of HTTP attempts made.
    pub attempts: u32,
    /// Outcome of the last attempt.
    pub last: AttemptOutcome,
}

impl DeliveryReport {
    /// Whether the record was delivered.
    pub fn is_success(&self) -> bool {
        self.last.is_success()
    }

    /// Classify the final state of the delivery.
    pub fn disposition(&self) -> Disposition {
        match &self.last {
            AttemptOutcome::Success { .. } => Disposition::Delivered,
            outcome if outcome.is_transient() => Disposition::TransientExhausted,
            AttemptOutcome::Rejected { .. } => Disposition::Rejected,
            _ => Disposition::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Performs a single delivery attempt.
///
/// Implementations must be safe to share across concurrent deliveries.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST the record once and classify the result. Never retries.
    async fn post(&self, record: &DeliveryRecord) -> AttemptOutcome;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Collapse whitespace, redact bot tokens, and truncate a response body.
pub fn sanitize_response_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    // Telegram bot tokens: `<bot id>:<35 char secret>`.
    if let Ok(regex) = Regex::new(r"\b\d{6,12}:[A-Za-z0-9_\-]{30,}") {
        sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
    }

    if sanitized.chars().count() > MAX_LOGGED_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_LOGGED_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
