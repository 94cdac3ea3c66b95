//! Dispatcher pipeline, concurrency cap, and shutdown behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use telehook::relay::{
    ChatKind, DeliveryRecord, DispatchSummary, Dispatcher, DispatcherSettings, DispatcherState,
    InboundEvent, Whitelist,
};
use telehook::webhook::{AttemptOutcome, DeliveryClient, RetryPolicy, WebhookTransport};

// ── Mock transports ──

/// Records every posted record and answers with a fixed outcome.
#[derive(Debug)]
struct RecordingTransport {
    outcome: AttemptOutcome,
    posted: Mutex<Vec<DeliveryRecord>>,
}

impl RecordingTransport {
    fn new(outcome: AttemptOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            posted: Mutex::new(Vec::new()),
        })
    }

    fn posted(&self) -> Vec<DeliveryRecord> {
        match self.posted.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, record: &DeliveryRecord) -> AttemptOutcome {
        match self.posted.lock() {
            Ok(mut guard) => guard.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
        self.outcome.clone()
    }

    fn endpoint(&self) -> &str {
        "mock://recording"
    }
}

/// Sleeps for `delay` per post while tracking peak concurrency.
#[derive(Debug)]
struct SlowTransport {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowTransport {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WebhookTransport for SlowTransport {
    async fn post(&self, _record: &DeliveryRecord) -> AttemptOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        AttemptOutcome::Success { status: 200 }
    }

    fn endpoint(&self) -> &str {
        "mock://slow"
    }
}

/// Panics for one chat id, succeeds for the rest.
#[derive(Debug)]
struct PanickingTransport {
    poison_chat: i64,
}

#[async_trait]
impl WebhookTransport for PanickingTransport {
    async fn post(&self, record: &DeliveryRecord) -> AttemptOutcome {
        if record.chat_id == self.poison_chat {
            panic!("transport exploded for chat {}", record.chat_id);
        }
        AttemptOutcome::Success { status: 200 }
    }

    fn endpoint(&self) -> &str {
        "mock://panicking"
    }
}

// ── Helpers ──

fn settings(max_concurrency: usize, grace_secs: u64) -> DispatcherSettings {
    DispatcherSettings {
        max_concurrency,
        shutdown_grace: Duration::from_secs(grace_secs),
    }
}

fn dispatcher(
    whitelist: Whitelist,
    transport: Arc<dyn WebhookTransport>,
    settings: DispatcherSettings,
) -> Dispatcher {
    let client = DeliveryClient::new(transport, RetryPolicy::default());
    Dispatcher::new(Arc::new(whitelist), client, settings)
}

fn group_event(chat_id: i64, message_id: i32) -> InboundEvent {
    InboundEvent::new(chat_id, message_id)
        .with_text("hello")
        .with_sender(555)
        .with_kind(ChatKind::Group)
}

/// Feed `events`, close the source, and wait for the summary.
async fn run_to_completion(dispatcher: Dispatcher, events: Vec<InboundEvent>) -> DispatchSummary {
    let (event_tx, event_rx) = mpsc::channel(events.len().max(1));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(event_rx, shutdown_rx));

    for event in events {
        if event_tx.send(event).await.is_err() {
            panic!("dispatcher closed the source early");
        }
    }
    drop(event_tx);

    match handle.await {
        Ok(summary) => summary,
        Err(err) => panic!("dispatcher task failed: {err}"),
    }
}

// ── Tests ──

#[tokio::test(start_paused = true)]
async fn non_whitelisted_events_produce_no_deliveries() {
    let transport = RecordingTransport::new(AttemptOutcome::Success { status: 200 });
    let dispatcher = dispatcher(
        Whitelist::new([42]),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, 10),
    );

    let summary = run_to_completion(
        dispatcher,
        vec![group_event(-100_123, 1), group_event(7, 2), group_event(-1, 3)],
    )
    .await;

    assert!(transport.posted().is_empty());
    assert_eq!(summary.received, 3);
    assert_eq!(summary.discarded, 3);
    assert_eq!(summary.finished(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_whitelist_delivers_every_event_once() {
    let transport = RecordingTransport::new(AttemptOutcome::Success { status: 200 });
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(2, 10),
    );

    let events = (1..=6).map(|i| group_event(-100 - i64::from(i), i)).collect();
    let summary = run_to_completion(dispatcher, events).await;

    let mut ids: Vec<i32> = transport.posted().iter().map(|r| r.message_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(summary.delivered, 6);
    assert_eq!(summary.discarded, 0);
}

#[tokio::test(start_paused = true)]
async fn whitelisted_event_is_delivered_with_canonical_payload() {
    let transport = RecordingTransport::new(AttemptOutcome::Success { status: 200 });
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, 10),
    );

    let summary = run_to_completion(dispatcher, vec![group_event(-100_123, 10)]).await;
    assert_eq!(summary.delivered, 1);

    let posted = transport.posted();
    assert_eq!(posted.len(), 1);
    let value = match serde_json::to_value(&posted[0]) {
        Ok(value) => value,
        Err(err) => panic!("record should serialize: {err}"),
    };
    assert_eq!(value["message"], "hello");
    assert_eq!(value["chat_id"], -100_123);
    assert_eq!(value["sender_id"], 555);
    assert_eq!(value["is_group"], true);
    assert_eq!(value["is_channel"], false);
    assert!(value["reply_to_msg_id"].is_null());
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_configured_cap() {
    let transport = SlowTransport::new(Duration::from_secs(2));
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(3, 60),
    );

    let events = (1..=10).map(|i| group_event(-100, i)).collect();
    let summary = run_to_completion(dispatcher, events).await;

    assert_eq!(summary.delivered, 10);
    assert_eq!(transport.completed.load(Ordering::SeqCst), 10);
    assert_eq!(transport.peak.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_delivery_does_not_stop_following_events() {
    let transport = RecordingTransport::new(AttemptOutcome::from_status(500, "internal error"));
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(1, 10),
    );

    let summary = run_to_completion(dispatcher, vec![group_event(1, 1), group_event(2, 2)]).await;

    // 500 is not transient: one attempt per event.
    assert_eq!(transport.posted().len(), 2);
    assert_eq!(summary.rejected, 2);
    assert_eq!(summary.delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_delivery_is_contained_to_its_event() {
    let transport: Arc<dyn WebhookTransport> = Arc::new(PanickingTransport { poison_chat: 13 });
    let dispatcher = dispatcher(Whitelist::allow_all(), transport, settings(1, 10));

    let summary = run_to_completion(
        dispatcher,
        vec![group_event(13, 1), group_event(14, 2), group_event(15, 3)],
    )
    .await;

    assert_eq!(summary.panicked, 1);
    assert_eq!(summary.delivered, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_deliveries_within_grace() {
    let transport = SlowTransport::new(Duration::from_secs(3));
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, 10),
    );
    let mut state = dispatcher.state();

    let (event_tx, event_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(event_rx, shutdown_rx));

    for i in 1..=2 {
        if event_tx.send(group_event(-100, i)).await.is_err() {
            panic!("dispatcher closed the source early");
        }
    }
    // Let the dispatcher admit both events before signalling.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*state.borrow_and_update(), DispatcherState::Running);

    if shutdown_tx.send(true).is_err() {
        panic!("dispatcher dropped the shutdown receiver");
    }
    let summary = match handle.await {
        Ok(summary) => summary,
        Err(err) => panic!("dispatcher task failed: {err}"),
    };

    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.incomplete_on_shutdown, 0);
    assert_eq!(*state.borrow(), DispatcherState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn deliveries_past_grace_are_abandoned() {
    let transport = SlowTransport::new(Duration::from_secs(120));
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, 5),
    );

    let (event_tx, event_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(event_rx, shutdown_rx));

    for i in 1..=2 {
        if event_tx.send(group_event(-100, i)).await.is_err() {
            panic!("dispatcher closed the source early");
        }
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    if shutdown_tx.send(true).is_err() {
        panic!("dispatcher dropped the shutdown receiver");
    }
    let summary = match handle.await {
        Ok(summary) => summary,
        Err(err) => panic!("dispatcher task failed: {err}"),
    };

    assert_eq!(summary.incomplete_on_shutdown, 2);
    assert_eq!(summary.delivered, 0);
    assert_eq!(transport.completed.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn events_queued_after_shutdown_are_not_accepted() {
    let transport = RecordingTransport::new(AttemptOutcome::Success { status: 200 });
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, 5),
    );

    let (event_tx, event_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if shutdown_tx.send(true).is_err() {
        panic!("receiver should be alive");
    }
    for i in 1..=3 {
        if event_tx.send(group_event(-100, i)).await.is_err() {
            panic!("channel should accept queued events");
        }
    }

    let summary = dispatcher.run(event_rx, shutdown_rx).await;

    assert!(transport.posted().is_empty());
    assert_eq!(summary.received, 0);
    assert_eq!(summary.unaccepted, 3);
}

#[tokio::test(start_paused = true)]
async fn unrepresentable_grace_waits_for_in_flight_deliveries() {
    let transport = SlowTransport::new(Duration::from_secs(1));
    let dispatcher = dispatcher(
        Whitelist::allow_all(),
        Arc::clone(&transport) as Arc<dyn WebhookTransport>,
        settings(4, u64::MAX),
    );

    let (event_tx, event_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(event_rx, shutdown_rx));

    for i in 1..=2 {
        if event_tx.send(group_event(-100, i)).await.is_err() {
            panic!("dispatcher closed the source early");
        }
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    if shutdown_tx.send(true).is_err() {
        panic!("dispatcher dropped the shutdown receiver");
    }
    let summary = match handle.await {
        Ok(summary) => summary,
        Err(err) => panic!("dispatcher task failed: {err}"),
    };

    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.incomplete_on_shutdown, 0);
    assert_eq!(transport.completed.load(Ordering::SeqCst), 2);
}
