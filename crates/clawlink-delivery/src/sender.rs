//! Ordered, at-least-once delivery of log payloads.
//!
//! Every hook funnels its payloads into one [`DeliverySender`], which feeds a
//! single worker task over an unbounded channel. The worker sends payloads
//! one at a time, so logs for a session reach the board in the order the
//! hooks fired even when an individual send takes several round trips.
//!
//! A failed immediate send is persisted to the durable queue instead of
//! dropped. Queue entries are retried forever on a capped backoff: the only
//! way out of the queue is a successful delivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use clawlink_board::{BoardApi, BoardError, LogPayload, TopicUpsert};
use clawlink_core::BackoffConfig;
use clawlink_settings::DeliverySettings;

use crate::idempotency::ensure_idempotency_key;
use crate::sqlite::connection::ConnectionPool;
use crate::sqlite::repositories::QueueEntryRepo;

/// Minimum interval between warnings sharing an error signature.
const WARN_SUPPRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Characters of an error message persisted to `last_error`.
const LAST_ERROR_CHARS: usize = 500;

/// Tuning for the sender worker.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Total deadline for the immediate-send retry loop, in milliseconds.
    pub send_deadline_ms: u64,
    /// Background drain timer period, in milliseconds.
    pub drain_interval_ms: u64,
    /// Maximum queue entries attempted per drain pass.
    pub drain_batch_size: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default())
    }
}

impl SenderConfig {
    /// Build from the delivery section of the settings file.
    #[must_use]
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            send_deadline_ms: settings.send_deadline_ms,
            drain_interval_ms: settings.drain_interval_ms.max(250),
            drain_batch_size: settings.drain_batch_size.max(1),
        }
    }
}

/// Work items processed in arrival order by the worker.
enum DeliveryCommand {
    Send(Box<LogPayload>),
    UpsertTopic(Box<TopicUpsert>),
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting payloads to the delivery worker.
///
/// Cheap to clone; all clones feed the same ordered channel. Submission
/// never blocks and never fails outward: when the worker is gone the
/// payload is dropped with a warning, matching the fail-open posture of
/// the capture hooks.
#[derive(Clone)]
pub struct DeliverySender {
    tx: mpsc::UnboundedSender<DeliveryCommand>,
}

impl DeliverySender {
    /// Queue a payload for ordered delivery.
    pub fn send(&self, payload: LogPayload) {
        if self
            .tx
            .send(DeliveryCommand::Send(Box::new(payload)))
            .is_err()
        {
            warn!("delivery worker is gone, dropping payload");
        }
    }

    /// Queue a topic upsert, ordered with respect to payloads.
    ///
    /// Submitting the upsert before the first payload that references the
    /// topic guarantees the topic row exists by the time that payload is
    /// attempted.
    pub fn upsert_topic(&self, upsert: TopicUpsert) {
        if self
            .tx
            .send(DeliveryCommand::UpsertTopic(Box::new(upsert)))
            .is_err()
        {
            warn!("delivery worker is gone, dropping topic upsert");
        }
    }

    /// Wait until every command submitted so far has been processed and one
    /// drain pass over the durable queue has completed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(DeliveryCommand::Flush(ack)).is_err() {
            return;
        }
        let _ = done.await;
    }
}

/// Spawn the delivery worker.
///
/// Returns the submission handle and the worker's join handle. The worker
/// exits after all [`DeliverySender`] clones are dropped, running one final
/// drain pass first.
pub fn spawn_sender(
    api: Arc<dyn BoardApi>,
    pool: ConnectionPool,
    config: SenderConfig,
) -> (DeliverySender, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = SenderWorker {
        api,
        pool,
        config,
        immediate: BackoffConfig::immediate(),
        durable: BackoffConfig::durable(),
        throttle: WarnThrottle::new(WARN_SUPPRESS_INTERVAL),
    };
    let handle = tokio::spawn(worker.run(rx));
    (DeliverySender { tx }, handle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

struct SenderWorker {
    api: Arc<dyn BoardApi>,
    pool: ConnectionPool,
    config: SenderConfig,
    immediate: BackoffConfig,
    durable: BackoffConfig,
    throttle: WarnThrottle,
}

impl SenderWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DeliveryCommand>) {
        let mut drain =
            tokio::time::interval(Duration::from_millis(self.config.drain_interval_ms));
        drain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The interval's first tick completes immediately, which doubles as
        // the startup sweep over backlog left by a previous process.
        loop {
            tokio::select! {
                biased;
                cmd = rx.recv() => match cmd {
                    Some(DeliveryCommand::Send(payload)) => self.deliver(*payload).await,
                    Some(DeliveryCommand::UpsertTopic(upsert)) => self.upsert(*upsert).await,
                    Some(DeliveryCommand::Flush(ack)) => {
                        self.drain_due().await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                _ = drain.tick() => self.drain_due().await,
            }
        }
        self.drain_due().await;
    }

    /// Immediate path: retry under the deadline, queue on failure.
    async fn deliver(&mut self, mut payload: LogPayload) {
        let key = ensure_idempotency_key(&mut payload);
        match self.post_with_retry(&payload).await {
            Ok(()) => {
                debug!(%key, "payload delivered");
                self.drain_due().await;
            }
            Err(err) => {
                self.warn_transport(&err, "immediate delivery failed, queueing payload");
                self.enqueue(&key, &payload);
            }
        }
    }

    /// Retry `post_log` with jittered backoff until the send deadline.
    async fn post_with_retry(&self, payload: &LogPayload) -> Result<(), BoardError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.send_deadline_ms);
        let mut attempt: u32 = 0;
        loop {
            match self.api.post_log(payload).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let delay = Duration::from_millis(self.immediate.delay_for_attempt(attempt));
                    if Instant::now() + delay >= deadline {
                        return Err(err);
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn enqueue(&self, key: &str, payload: &LogPayload) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, key, "failed to serialize payload, dropping");
                return;
            }
        };
        match self.pool.get() {
            Ok(conn) => match QueueEntryRepo::enqueue(&conn, key, &json, now_ms()) {
                Ok(true) => debug!(key, "payload queued for durable delivery"),
                Ok(false) => debug!(key, "payload already queued, duplicate suppressed"),
                Err(err) => warn!(error = %err, key, "failed to queue payload"),
            },
            Err(err) => warn!(error = %err, key, "queue connection unavailable"),
        }
    }

    /// One pass over due queue entries, oldest first.
    ///
    /// Stops at the first transport failure: while the service is down,
    /// attempting the rest of the batch would just stack up timeouts on the
    /// ordering chain.
    async fn drain_due(&mut self) {
        let rows = {
            let conn = match self.pool.get() {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "queue connection unavailable, skipping drain");
                    return;
                }
            };
            match QueueEntryRepo::due_entries(&conn, now_ms(), self.config.drain_batch_size) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(error = %err, "failed to scan durable queue");
                    return;
                }
            }
        };

        for row in rows {
            let payload: LogPayload = match serde_json::from_str(&row.payload_json) {
                Ok(payload) => payload,
                Err(err) => {
                    // Unreadable rows get a distant retry, never a crash and
                    // never a delete: a later build may parse them again.
                    let next = now_ms().saturating_add(to_i64(self.durable.max_delay_ms));
                    self.reschedule(row.id, &format!("payload parse failed: {err}"), next);
                    continue;
                }
            };

            match self.api.post_log(&payload).await {
                Ok(()) => {
                    debug!(
                        key = row.idempotency_key.as_str(),
                        attempts = row.attempts,
                        "queued payload delivered"
                    );
                    self.remove(row.id);
                }
                Err(err) => {
                    let delay = self.durable.delay_for_attempt(row.attempts);
                    let next = now_ms().saturating_add(to_i64(delay));
                    self.reschedule(row.id, &err.to_string(), next);
                    self.warn_transport(&err, "queued delivery failed, rescheduled");
                    break;
                }
            }
        }
    }

    async fn upsert(&mut self, upsert: TopicUpsert) {
        match self.api.upsert_topic(&upsert).await {
            Ok(topic) => debug!(topic_id = topic.id.as_str(), "topic upserted"),
            Err(err) => self.warn_transport(&err, "topic upsert failed"),
        }
    }

    fn reschedule(&self, id: i64, error: &str, next_attempt_at_ms: i64) {
        let error: String = error.chars().take(LAST_ERROR_CHARS).collect();
        match self.pool.get() {
            Ok(conn) => {
                if let Err(err) =
                    QueueEntryRepo::record_failure(&conn, id, &error, next_attempt_at_ms)
                {
                    warn!(error = %err, id, "failed to reschedule queue entry");
                }
            }
            Err(err) => warn!(error = %err, id, "queue connection unavailable"),
        }
    }

    fn remove(&self, id: i64) {
        match self.pool.get() {
            Ok(conn) => {
                if let Err(err) = QueueEntryRepo::delete(&conn, id) {
                    warn!(error = %err, id, "failed to delete delivered queue entry");
                }
            }
            Err(err) => warn!(error = %err, id, "queue connection unavailable"),
        }
    }

    fn warn_transport(&mut self, err: &BoardError, message: &'static str) {
        let signature = error_signature(err);
        if self.throttle.should_log(&signature) {
            warn!(error = %err, signature = signature.as_str(), "{message}");
        } else {
            debug!(error = %err, signature = signature.as_str(), "{message}");
        }
    }
}

/// Collapse an error into a coarse signature for warning suppression.
fn error_signature(err: &BoardError) -> String {
    match err {
        BoardError::Api { status, .. } => format!("api:{status}"),
        BoardError::Http(e) if e.is_timeout() => "http:timeout".to_string(),
        BoardError::Http(e) if e.is_connect() => "http:connect".to_string(),
        BoardError::Http(_) => "http:other".to_string(),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-signature warning rate limiter.
struct WarnThrottle {
    interval: Duration,
    last: HashMap<String, Instant>,
}

impl WarnThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    fn should_log(&mut self, signature: &str) -> bool {
        let now = Instant::now();
        if self.last.len() > 64 {
            self.last
                .retain(|_, at| now.duration_since(*at) < self.interval);
        }
        match self.last.get(signature) {
            Some(at) if now.duration_since(*at) < self.interval => false,
            _ => {
                let _ = self.last.insert(signature.to_string(), now);
                true
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
