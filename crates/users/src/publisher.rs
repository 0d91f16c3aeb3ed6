//! Best-effort publication of user lifecycle envelopes.
//!
//! Sends go through one dedicated thread so envelopes for the same user leave
//! in the order they were committed, even when an earlier send is slow. The
//! caller waits at most `send_timeout` for the transport to acknowledge; past
//! that it gets [`PublishError::Timeout`] while the send keeps going in the
//! background.

use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use postview_events::{EnvelopeError, EventBus, EventType, Keyed, TransportRecord, UserEvent};

use crate::user::User;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("transport send failed: {0}")]
    Transport(String),

    #[error("transport did not acknowledge within {0:?}")]
    Timeout(Duration),

    /// The publisher was shut down.
    #[error("publisher closed")]
    Closed,
}

struct PublishRequest {
    record: TransportRecord,
    ack: mpsc::SyncSender<Result<(), String>>,
}

/// Turns committed user mutations into envelopes on the event transport.
pub struct EventPublisher {
    topic: String,
    send_timeout: Duration,
    queue: Mutex<Option<mpsc::Sender<PublishRequest>>>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

impl core::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("topic", &self.topic)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Start the sender thread over `bus`.
    pub fn spawn<B>(bus: B, topic: impl Into<String>, send_timeout: Duration) -> std::io::Result<Self>
    where
        B: EventBus<TransportRecord> + 'static,
    {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel::<PublishRequest>();

        let join = thread::Builder::new()
            .name(format!("publisher:{topic}"))
            .spawn(move || sender_loop(bus, rx))?;

        Ok(Self {
            topic,
            send_timeout,
            queue: Mutex::new(Some(tx)),
            join: Mutex::new(Some(join)),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the envelope for `user` and hand it to the transport.
    ///
    /// The envelope version is the user's own mutation counter, except for
    /// deletions which go out at [`User::tombstone_version`].
    pub fn publish(&self, user: &User, event_type: EventType) -> Result<(), PublishError> {
        let version = match event_type {
            EventType::Created | EventType::Updated => user.version(),
            EventType::Deleted => user.tombstone_version(),
        };
        let envelope = UserEvent::new(event_type, user.id(), Some(user.snapshot()), Utc::now(), version);
        self.send(&envelope)
    }

    /// Send an already-built envelope, keyed by its user id.
    pub fn send(&self, envelope: &UserEvent) -> Result<(), PublishError> {
        let record = TransportRecord::new(self.topic.clone(), envelope.key(), envelope.to_vec()?);
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);

        {
            let queue = self.queue.lock().map_err(|_| PublishError::Closed)?;
            let tx = queue.as_ref().ok_or(PublishError::Closed)?;
            tx.send(PublishRequest { record, ack: ack_tx })
                .map_err(|_| PublishError::Closed)?;
        }

        match ack_rx.recv_timeout(self.send_timeout) {
            Ok(Ok(())) => {
                debug!(
                    topic = %self.topic,
                    user_id = %envelope.user_id(),
                    event_type = %envelope.event_type(),
                    version = envelope.version(),
                    "published user event"
                );
                Ok(())
            }
            Ok(Err(msg)) => Err(PublishError::Transport(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PublishError::Timeout(self.send_timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PublishError::Closed),
        }
    }

    /// Stop accepting envelopes and wait until everything queued was sent.
    pub fn shutdown(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
        let join = self.join.lock().ok().and_then(|mut j| j.take());
        if let Some(j) = join {
            let _ = j.join();
        }
    }
}

impl Drop for EventPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sender_loop<B>(bus: B, rx: mpsc::Receiver<PublishRequest>)
where
    B: EventBus<TransportRecord>,
{
    // Ends once the sender side is dropped and the queue is empty.
    for req in rx {
        let key = req.record.key().to_string();
        let result = bus.publish(req.record).map_err(|e| e.to_string());

        if let Err(unacked) = req.ack.send(result) {
            // Caller already gave up waiting.
            if let Err(msg) = unacked.0 {
                warn!(key = %key, error = %msg, "late transport failure after publish timeout");
            }
        }
    }
}
