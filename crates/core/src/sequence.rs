//! Identifier sequences.
//!
//! Stores never mint identifiers themselves; a sequence is injected so a
//! durable implementation can replace the in-process counter without touching
//! the services.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of fresh, never-reused identifiers.
pub trait IdSequence: Send + Sync {
    fn next_id(&self) -> i64;
}

impl<S> IdSequence for std::sync::Arc<S>
where
    S: IdSequence + ?Sized,
{
    fn next_id(&self) -> i64 {
        (**self).next_id()
    }
}

/// Process-local sequence (tests/dev). Restarting the process resets it.
#[derive(Debug)]
pub struct InMemoryIdSequence {
    next: AtomicI64,
}

impl InMemoryIdSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for InMemoryIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence for InMemoryIdSequence {
    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
