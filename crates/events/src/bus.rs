//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport** between the owning side (which publishes
//! user lifecycle envelopes) and the dependent side (which projects them into
//! its local view). It makes minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels, Redis Streams, a partitioned log, ...
//! - **At-least-once delivery**: a message may arrive more than once; consumers are idempotent
//! - **Per-key ordering**: messages sharing a key arrive in publish order
//! - **No cross-key ordering**: nothing is promised between different keys

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(record) => process(record),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Bus closed
///     }
/// }
/// ```
///
/// Subscriptions are consumed by one thread. Messages come out in the order
/// the bus delivered them, which for a single key is the order they were
/// published.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// UserService (commit) → EventPublisher → EventBus → ProjectionWorker → UserViewProjection
/// ```
///
/// `publish()` can fail (closed channel, network error). The publisher owns
/// the policy for that: the local mutation is already committed and the
/// failure is logged, never rolled back.
///
/// The trait requires `Send + Sync`: publishers on request threads and the
/// consumer thread share one bus.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
