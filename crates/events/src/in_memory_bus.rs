//! In-memory event bus for tests/dev.

use std::sync::{Mutex, mpsc};

use thiserror::Error;
use tracing::debug;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("in-memory bus lock poisoned")]
    Poisoned,

    /// The bus was closed; nothing is delivered any more.
    #[error("in-memory bus closed")]
    Closed,
}

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Fan-out: every subscriber gets every message
/// - Single FIFO channel per subscriber, so per-key order is publish order
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Option<Vec<mpsc::Sender<M>>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the bus: subscribers see `Disconnected` once they drain, and
    /// further publishes fail with [`InMemoryBusError::Closed`].
    pub fn close(&self) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.take();
        }
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Some(Vec::new())),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut guard = self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let subs = guard.as_mut().ok_or(InMemoryBusError::Closed)?;

        // Drop any dead subscribers while publishing.
        let before = subs.len();
        subs.retain(|tx| tx.send(message.clone()).is_ok());
        if subs.len() < before {
            debug!(dropped = before - subs.len(), "removed disconnected subscribers");
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A closed or poisoned bus still hands out a subscription; it simply
        // never receives anything.
        if let Ok(mut guard) = self.subscribers.lock() {
            if let Some(subs) = guard.as_mut() {
                subs.push(tx);
            }
        }

        Subscription::new(rx)
    }
}
