//! Event dispatcher: whitelist → normalize → deliver, with bounded concurrency.
//!
//! Events are taken from the source channel in arrival order. Each admitted
//! event waits for one of `max_concurrency` permits and is then delivered on
//! its own task, so a slow endpoint holds back intake only once every permit
//! is in use. Events waiting behind the cap stay queued in the bounded source
//! channel in FIFO order.
//!
//! Deliveries run concurrently, so completion order does not follow arrival
//! order. That is intended: the relay only promises that every admitted event
//! gets a delivery attempt.
//!
//! Lifecycle: `Running` until the shutdown signal fires or the source closes,
//! then `ShuttingDown` while in-flight deliveries drain for up to
//! `shutdown_grace`, then `Stopped`. Deliveries still running at the deadline
//! are aborted and logged as `incomplete_on_shutdown`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::event::InboundEvent;
use super::normalize::{normalize, DeliveryRecord};
use super::whitelist::{Verdict, Whitelist};
use crate::webhook::client::DeliveryClient;
use crate::webhook::{DeliveryReport, Disposition};

/// Default number of deliveries allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default time allowed for in-flight deliveries to finish after shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Maximum concurrent deliveries (values below 1 are treated as 1).
    pub max_concurrency: usize,
    /// Grace period for in-flight deliveries during shutdown.
    pub shutdown_grace: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Observable dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Accepting and delivering events.
    Running,
    /// No longer accepting events; draining in-flight deliveries.
    ShuttingDown,
    /// All work drained or abandoned.
    Stopped,
}

/// Counters reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Events taken from the source.
    pub received: u64,
    /// Events dropped by the whitelist.
    pub discarded: u64,
    /// Records delivered with HTTP 200.
    pub delivered: u64,
    /// Records rejected with a non-transient status.
    pub rejected: u64,
    /// Records dropped after exhausting retries on transient failures.
    pub exhausted: u64,
    /// Records dropped after a non-retryable request error.
    pub failed: u64,
    /// Delivery tasks that panicked.
    pub panicked: u64,
    /// Admitted events whose delivery did not finish before shutdown.
    pub incomplete_on_shutdown: u64,
    /// Events still queued in the source channel at shutdown.
    pub unaccepted: u64,
}

impl DispatchSummary {
    /// Total delivery tasks that reached a final outcome.
    pub fn finished(&self) -> u64 {
        self.delivered
            .saturating_add(self.rejected)
            .saturating_add(self.exhausted)
            .saturating_add(self.failed)
    }
}

/// Identifiers of an in-flight event, kept for logging.
#[derive(Debug, Clone, Copy)]
struct EventRef {
    chat_id: i64,
    message_id: i32,
}

/// Sequences filter → normalize → deliver for every inbound event.
#[derive(Debug)]
pub struct Dispatcher {
    whitelist: Arc<Whitelist>,
    client: DeliveryClient,
    settings: DispatcherSettings,
    state_tx: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    /// Create a dispatcher in the `Running` state.
    pub fn new(
        whitelist: Arc<Whitelist>,
        client: DeliveryClient,
        settings: DispatcherSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Running);
        Self {
            whitelist,
            client,
            settings,
            state_tx,
        }
    }

    /// Subscribe to lifecycle state changes.
    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state_tx.subscribe()
    }

    /// Consume events until shutdown or until the source closes.
    ///
    /// `shutdown` fires when it changes to `true` or its sender is dropped.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<InboundEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> DispatchSummary {
        let max_concurrency = self.settings.max_concurrency.max(1);
        let permits = Arc::new(Semaphore::new(max_concurrency));
        let mut tasks: JoinSet<DeliveryReport> = JoinSet::new();
        let mut in_flight: HashMap<Id, EventRef> = HashMap::new();
        let mut summary = DispatchSummary::default();

        info!(
            max_concurrency,
            grace_secs = self.settings.shutdown_grace.as_secs(),
            "dispatcher running"
        );

        let already_stopping = *shutdown.borrow_and_update();

        'intake: loop {
            if already_stopping {
                info!("shutdown requested before start, not accepting events");
                break 'intake;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("received shutdown signal, stopping intake");
                        break 'intake;
                    }
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    record_completion(joined, &mut in_flight, &mut summary);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event source closed, stopping intake");
                        break 'intake;
                    };
                    summary.received = summary.received.saturating_add(1);

                    let Some(record) = self.admit(&event) else {
                        summary.discarded = summary.discarded.saturating_add(1);
                        continue;
                    };
                    let event_ref = EventRef {
                        chat_id: record.chat_id,
                        message_id: record.message_id,
                    };

                    // Wait for a free slot while still reacting to shutdown
                    // and reaping finished deliveries.
                    let permit = loop {
                        tokio::select! {
                            biased;
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    warn!(
                                        chat_id = event_ref.chat_id,
                                        message_id = event_ref.message_id,
                                        outcome = "incomplete_on_shutdown",
                                        "shutdown before delivery started"
                                    );
                                    summary.incomplete_on_shutdown =
                                        summary.incomplete_on_shutdown.saturating_add(1);
                                    break 'intake;
                                }
                            }
                            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                                record_completion(joined, &mut in_flight, &mut summary);
                            }
                            acquired = Arc::clone(&permits).acquire_owned() => {
                                match acquired {
                                    Ok(permit) => break permit,
                                    Err(e) => {
                                        error!(error = %e, "delivery permits closed");
                                        break 'intake;
                                    }
                                }
                            }
                        }
                    };

                    let client = self.client.clone();
                    let handle = tasks.spawn(async move {
                        let _permit = permit;
                        client.deliver(&record).await
                    });
                    in_flight.insert(handle.id(), event_ref);
                }
            }
        }

        self.set_state(DispatcherState::ShuttingDown);
        events.close();
        while events.try_recv().is_ok() {
            summary.unaccepted = summary.unaccepted.saturating_add(1);
        }
        if summary.unaccepted > 0 {
            warn!(
                unaccepted = summary.unaccepted,
                "discarding queued events not accepted before shutdown"
            );
        }

        self.drain(&mut tasks, &mut in_flight, &mut summary).await;

        self.set_state(DispatcherState::Stopped);
        info!(
            received = summary.received,
            discarded = summary.discarded,
            delivered = summary.delivered,
            rejected = summary.rejected,
            exhausted = summary.exhausted,
            failed = summary.failed,
            panicked = summary.panicked,
            incomplete_on_shutdown = summary.incomplete_on_shutdown,
            "dispatcher stopped"
        );
        summary
    }

    /// Apply the whitelist and normalize an allowed event.
    ///
    /// Runs on the intake loop, outside the per-delivery panic boundary, so
    /// it must stay total: `Whitelist::check` is a set lookup and `normalize`
    /// substitutes defaults instead of failing. Anything that can fail
    /// belongs in the spawned delivery task.
    fn admit(&self, event: &InboundEvent) -> Option<DeliveryRecord> {
        if self.whitelist.check(event.chat_id) == Verdict::Deny {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "message from non-whitelisted chat {} - discarding",
                event.chat_id
            );
            return None;
        }

        let record = normalize(event);
        let reply_info = record
            .reply_to_msg_id
            .map(|id| format!(" (replying to msg {id})"))
            .unwrap_or_default();
        info!(
            chat_id = record.chat_id,
            message_id = record.message_id,
            "new message from {} {}: {}{reply_info}",
            record.chat_label(),
            record.chat_id,
            record.preview()
        );
        Some(record)
    }

    /// Wait for in-flight deliveries until they finish or the grace period ends.
    async fn drain(
        &self,
        tasks: &mut JoinSet<DeliveryReport>,
        in_flight: &mut HashMap<Id, EventRef>,
        summary: &mut DispatchSummary,
    ) {
        if tasks.is_empty() {
            return;
        }

        let grace = self.settings.shutdown_grace;
        info!(
            in_flight = tasks.len(),
            grace_secs = grace.as_secs(),
            "waiting for in-flight deliveries"
        );
        // A grace too large to represent as an instant means no deadline.
        let deadline = tokio::time::Instant::now().checked_add(grace);

        while !tasks.is_empty() {
            let joined = match deadline {
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await
                }
                None => Ok(tasks.join_next_with_id().await),
            };
            match joined {
                Ok(Some(joined)) => record_completion(joined, in_flight, summary),
                Ok(None) => break,
                Err(_) => {
                    for (_, event_ref) in in_flight.drain() {
                        warn!(
                            chat_id = event_ref.chat_id,
                            message_id = event_ref.message_id,
                            outcome = "incomplete_on_shutdown",
                            "delivery abandoned at shutdown"
                        );
                        summary.incomplete_on_shutdown =
                            summary.incomplete_on_shutdown.saturating_add(1);
                    }
                    tasks.shutdown().await;
                    break;
                }
            }
        }
    }

    fn set_state(&self, state: DispatcherState) {
        debug!(?state, "dispatcher state change");
        self.state_tx.send_replace(state);
    }
}

/// Fold a finished delivery task into the summary.
fn record_completion(
    joined: Result<(Id, DeliveryReport), JoinError>,
    in_flight: &mut HashMap<Id, EventRef>,
    summary: &mut DispatchSummary,
) {
    match joined {
        Ok((id, report)) => {
            let event_ref = in_flight.remove(&id);
            let disposition = report.disposition();
            debug!(
                chat_id = event_ref.map(|e| e.chat_id),
                message_id = event_ref.map(|e| e.message_id),
                attempts = report.attempts,
                disposition = disposition.label(),
                "delivery finished"
            );
            let counter = match disposition {
                Disposition::Delivered => &mut summary.delivered,
                Disposition::Rejected => &mut summary.rejected,
                Disposition::TransientExhausted => &mut summary.exhausted,
                Disposition::Failed => &mut summary.failed,
            };
            *counter = counter.saturating_add(1);
        }
        Err(e) => {
            let event_ref = in_flight.remove(&e.id());
            if e.is_panic() {
                error!(
                    chat_id = event_ref.map(|r| r.chat_id),
                    message_id = event_ref.map(|r| r.message_id),
                    outcome = "panicked",
                    "unexpected error processing message: {e}"
                );
                summary.panicked = summary.panicked.saturating_add(1);
            } else {
                debug!(error = %e, "delivery task cancelled");
            }
        }
    }
}
