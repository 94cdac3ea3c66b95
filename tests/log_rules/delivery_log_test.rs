//! One log line per delivery attempt: `INFO` on success, `ERROR` otherwise.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use telehook::relay::{normalize, DeliveryRecord, InboundEvent};
use telehook::webhook::{AttemptOutcome, DeliveryClient, RetryPolicy, WebhookTransport};

use crate::capture::{capture, count_at};

const CLIENT_TARGET: &str = "telehook::webhook::client";

/// Replays outcomes in order, then keeps answering with the last one.
struct Replay {
    script: Mutex<VecDeque<AttemptOutcome>>,
    last: AttemptOutcome,
}

impl Replay {
    fn new(script: Vec<AttemptOutcome>) -> Arc<Self> {
        let last = match script.last() {
            Some(last) => last.clone(),
            None => AttemptOutcome::Success { status: 200 },
        };
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last,
        })
    }
}

#[async_trait]
impl WebhookTransport for Replay {
    async fn post(&self, _record: &DeliveryRecord) -> AttemptOutcome {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| self.last.clone())
    }

    fn endpoint(&self) -> &str {
        "mock://replay"
    }
}

fn record() -> DeliveryRecord {
    normalize(&InboundEvent::new(-100_123, 10).with_text("hello").with_sender(555))
}

async fn deliver_with(script: Vec<AttemptOutcome>) -> Vec<String> {
    let (logs, _guard) = capture();
    let client = DeliveryClient::new(
        Replay::new(script) as Arc<dyn WebhookTransport>,
        RetryPolicy::default(),
    );
    let _report = client.deliver(&record()).await;
    logs.matching(CLIENT_TARGET)
}

#[tokio::test(start_paused = true)]
async fn retried_delivery_logs_every_attempt() {
    let lines = deliver_with(vec![
        AttemptOutcome::Timeout,
        AttemptOutcome::Timeout,
        AttemptOutcome::Success { status: 200 },
    ])
    .await;

    assert_eq!(lines.len(), 3, "{lines:#?}");
    assert_eq!(count_at(&lines, "ERROR"), 2, "{lines:#?}");
    assert_eq!(count_at(&lines, "INFO"), 1, "{lines:#?}");
    assert!(lines[0].contains("timeout"));
    assert!(lines[2].contains("success"));
}

#[tokio::test(start_paused = true)]
async fn rejected_delivery_logs_single_error() {
    let lines = deliver_with(vec![AttemptOutcome::from_status(500, "internal error")]).await;

    assert_eq!(lines.len(), 1, "{lines:#?}");
    assert_eq!(count_at(&lines, "ERROR"), 1);
    assert!(lines[0].contains("rejected"));
    assert!(lines[0].contains("internal error"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_delivery_logs_error_per_attempt() {
    let lines = deliver_with(vec![AttemptOutcome::ConnectionError("refused".into())]).await;

    assert_eq!(lines.len(), 3, "{lines:#?}");
    assert_eq!(count_at(&lines, "ERROR"), 3);
    assert_eq!(count_at(&lines, "INFO"), 0);
}
