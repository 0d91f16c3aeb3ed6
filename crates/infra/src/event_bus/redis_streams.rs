//! Redis Streams-backed transport (durable, at-least-once delivery).
//!
//! - **Stream key**: the topic name (`user-events`), one stream per topic
//! - **Entry fields**: `key` (partitioning key) and `value` (envelope bytes)
//! - **Consumer groups**: one per consuming service; each entry is delivered
//!   to one consumer of the group
//! - **Ack**: only after the consumer settled the entry's receipt, i.e. the
//!   handler returned; unacked entries stay pending in Redis and survive a
//!   consumer crash
//! - **Reclaim**: on start and periodically, entries pending longer than the
//!   idle threshold under any consumer of the group are claimed and
//!   redelivered; entries delivered too often are acked and dropped
//!
//! A stream is a single append-only log, so entries for one key are read in
//! the order they were added.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::Commands;
use tracing::{debug, error, info, instrument, warn};

use postview_events::{DeliveryReceipt, EventBus, Keyed, Subscription, TransportRecord};

const DEFAULT_GROUP: &str = "postview.user-view";
const READ_COUNT: usize = 32;
const BLOCK_MS: usize = 250;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_PENDING_IDLE: Duration = Duration::from_secs(60);
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);
const MAX_DELIVERIES: usize = 5;

type Entries = Vec<(String, Result<TransportRecord, RedisStreamsError>)>;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Malformed stream entry {id}: {reason}")]
    Decode { id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: Arc<redis::Client>,
    topic: String,
    connect_timeout: Duration,
    pending_idle: Duration,
}

impl RedisStreamsEventBus {
    /// Create a bus over the stream named `topic`.
    ///
    /// `connect_timeout` bounds every connection attempt, and therefore how
    /// long a publish can hang on an unreachable server.
    pub fn new(
        redis_url: impl AsRef<str>,
        topic: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            topic: topic.into(),
            connect_timeout,
            pending_idle: DEFAULT_PENDING_IDLE,
        })
    }

    /// How long an entry may sit unacknowledged before another consumer
    /// claims it.
    pub fn with_pending_idle(mut self, pending_idle: Duration) -> Self {
        self.pending_idle = pending_idle;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure a consumer group exists (idempotent).
    ///
    /// New groups start at the beginning of the stream so a fresh view is
    /// built from the full history.
    pub fn ensure_consumer_group(&self, group: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(&self.topic, group, "0");
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    #[instrument(skip(self, record), fields(stream = %self.topic, key = record.key()), err)]
    fn publish_sync(&self, record: TransportRecord) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let _: String = conn
            .xadd(
                &self.topic,
                "*",
                &[("key", record.key().as_bytes()), ("value", record.value())],
            )
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }

    fn read_group(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
    ) -> Result<Entries, RedisStreamsError> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(READ_COUNT)
            .block(BLOCK_MS);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.topic], &[">"], &opts)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .map(|entry| self.decode(entry))
            .collect())
    }

    /// Claim entries that other (or earlier) consumers left pending.
    fn reclaim_stale(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
    ) -> Result<Entries, RedisStreamsError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.topic, group, "-", "+", READ_COUNT)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let min_idle = self.pending_idle.as_millis() as usize;
        let mut stale = Vec::new();
        for entry in pending.ids {
            if entry.last_delivered_ms < min_idle {
                continue;
            }
            if entry.times_delivered >= MAX_DELIVERIES {
                warn!(
                    stream = %self.topic,
                    entry = %entry.id,
                    deliveries = entry.times_delivered,
                    "entry keeps failing to settle; dropping"
                );
                self.ack(conn, group, &[entry.id])?;
                continue;
            }
            stale.push(entry.id);
        }
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(&self.topic, group, consumer, min_idle, &stale)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;
        info!(stream = %self.topic, consumer, claimed = claimed.ids.len(), "reclaimed stale pending entries");

        Ok(claimed.ids.into_iter().map(|entry| self.decode(entry)).collect())
    }

    fn decode(&self, entry: StreamId) -> (String, Result<TransportRecord, RedisStreamsError>) {
        let decoded = match (entry.get::<String>("key"), entry.get::<Vec<u8>>("value")) {
            (Some(key), Some(value)) => Ok(TransportRecord::new(self.topic.clone(), key, value)),
            _ => Err(RedisStreamsError::Decode {
                id: entry.id.clone(),
                reason: "missing key or value field".to_string(),
            }),
        };
        (entry.id, decoded)
    }

    fn ack(&self, conn: &mut redis::Connection, group: &str, ids: &[String]) -> Result<(), RedisStreamsError> {
        let _: u64 = conn
            .xack(&self.topic, group, ids)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    /// Ack every entry whose receipt was settled since the last flush.
    fn flush_settled(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        settled: &mpsc::Receiver<String>,
    ) -> Result<(), RedisStreamsError> {
        let ids: Vec<String> = settled.try_iter().collect();
        if ids.is_empty() {
            return Ok(());
        }
        debug!(stream = %self.topic, acked = ids.len(), "acking settled entries");
        self.ack(conn, group, &ids)
    }

    /// Subscribe as `consumer` within `group`.
    ///
    /// A background thread reads the group and forwards records into the
    /// returned subscription. Each record carries a receipt; the entry is
    /// acked once that receipt is settled. Entries without the expected
    /// fields are acked and dropped.
    pub fn subscribe_with_group(&self, group: &str, consumer: &str) -> Subscription<TransportRecord> {
        if let Err(e) = self.ensure_consumer_group(group) {
            error!(stream = %self.topic, group, error = %e, "failed to create consumer group");
        }

        let (tx, rx) = mpsc::channel();
        let bus = self.clone();
        let group = group.to_string();
        let consumer = consumer.to_string();

        let spawned = thread::Builder::new()
            .name(format!("redis-streams:{}", self.topic))
            .spawn(move || bus.poll_loop(&group, &consumer, tx));
        if let Err(e) = spawned {
            error!(stream = %self.topic, error = %e, "failed to spawn stream reader");
        }

        Subscription::new(rx)
    }

    fn poll_loop(&self, group: &str, consumer: &str, tx: mpsc::Sender<TransportRecord>) {
        let (settled_tx, settled_rx) = mpsc::channel::<String>();
        let mut conn: Option<redis::Connection> = None;
        let mut last_reclaim: Option<Instant> = None;

        loop {
            if conn.is_none() {
                match self.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        warn!(stream = %self.topic, error = %e, "stream reader cannot connect; retrying");
                        thread::sleep(ERROR_BACKOFF);
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            if let Err(e) = self.flush_settled(c, group, &settled_rx) {
                warn!(stream = %self.topic, error = %e, "ack failed; entries will be redelivered");
            }

            let reclaim_due = last_reclaim.map_or(true, |at| at.elapsed() >= RECLAIM_INTERVAL);
            let batch = if reclaim_due {
                last_reclaim = Some(Instant::now());
                self.reclaim_stale(c, group, consumer)
            } else {
                self.read_group(c, group, consumer)
            };
            let entries = match batch {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(stream = %self.topic, error = %e, "stream read failed; reconnecting");
                    conn = None;
                    thread::sleep(ERROR_BACKOFF);
                    continue;
                }
            };

            for (id, decoded) in entries {
                match decoded {
                    Ok(record) => {
                        let receipt = DeliveryReceipt::new(id, settled_tx.clone());
                        if tx.send(record.with_receipt(receipt)).is_err() {
                            // Unsent entries stay pending and are reclaimed later.
                            debug!(stream = %self.topic, "subscription dropped; stream reader stopping");
                            if let Err(e) = self.flush_settled(c, group, &settled_rx) {
                                warn!(stream = %self.topic, error = %e, "final ack failed; entries will be redelivered");
                            }
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(stream = %self.topic, error = %e, "skipping malformed stream entry");
                        if let Err(e) = self.ack(c, group, &[id]) {
                            warn!(stream = %self.topic, error = %e, "ack failed; entry will be redelivered");
                        }
                    }
                }
            }
        }
    }
}

impl EventBus<TransportRecord> for RedisStreamsEventBus {
    type Error = RedisStreamsError;

    fn publish(&self, message: TransportRecord) -> Result<(), Self::Error> {
        self.publish_sync(message)
    }

    /// Joins the default consumer group under a fresh consumer name.
    ///
    /// Entries a previous process left pending are claimed once they have
    /// been idle for the configured threshold.
    fn subscribe(&self) -> Subscription<TransportRecord> {
        self.subscribe_with_group(DEFAULT_GROUP, &format!("consumer-{}", uuid::Uuid::now_v7()))
    }
}
