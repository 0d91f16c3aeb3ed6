//! Projection that keeps the materialized user view in sync with `user-events`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use postview_core::UserId;
use postview_events::{EnvelopeError, EventType, Keyed, TransportRecord, UserEvent};

use crate::read_model::{UserViewRow, UserViewStore};

/// How the projector resolves an envelope that is not newer than what the
/// view already holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ApplyPolicy {
    /// Apply only when the incoming version is strictly greater than the
    /// stored row version (or the version a deleted id was removed at).
    #[default]
    LastVersionWins,
    /// Apply in delivery order. Only an exact redelivery of the stored
    /// version is skipped, so an out-of-order older event can regress a row.
    LastDeliveredWins,
}

impl ApplyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyPolicy::LastVersionWins => "last-version-wins",
            ApplyPolicy::LastDeliveredWins => "last-delivered-wins",
        }
    }

    fn admits(self, incoming: u64, current: u64) -> bool {
        match self {
            ApplyPolicy::LastVersionWins => incoming > current,
            ApplyPolicy::LastDeliveredWins => incoming != current,
        }
    }
}

impl core::fmt::Display for ApplyPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last-version-wins" => Ok(ApplyPolicy::LastVersionWins),
            "last-delivered-wins" => Ok(ApplyPolicy::LastDeliveredWins),
            other => Err(format!("unknown apply policy: {other}")),
        }
    }
}

/// What applying one envelope did to the view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Row inserted or replaced at this version.
    Upserted { version: u64 },
    /// Row removed.
    Deleted,
    /// Delete for an id the view does not hold.
    Absent,
    /// Skipped: the view already reflects `current`.
    Stale { incoming: u64, current: u64 },
    /// Unknown event type, or an upsert with nothing to store.
    Ignored,
}

/// Sole writer of the materialized user view.
///
/// Callers must not apply envelopes for the same user concurrently; the
/// projection worker guarantees this by pinning each key to one partition.
pub struct UserViewProjection<S> {
    store: S,
    policy: ApplyPolicy,
    clock: fn() -> DateTime<Utc>,
}

impl<S> UserViewProjection<S>
where
    S: UserViewStore,
{
    pub fn new(store: S) -> Self {
        Self::with_policy(store, ApplyPolicy::default())
    }

    pub fn with_policy(store: S, policy: ApplyPolicy) -> Self {
        Self {
            store,
            policy,
            clock: Utc::now,
        }
    }

    /// Replace the source of `lastProcessedAt`.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> ApplyPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn apply_envelope(&self, event: &UserEvent) -> ApplyOutcome {
        let user_id = event.user_id();
        let incoming = event.version();

        let outcome = match event.event_type() {
            EventType::Created | EventType::Updated => {
                let Some(snapshot) = event.user() else {
                    warn!(user_id = %user_id, event_type = %event.event_type(), "upsert event without payload; ignored");
                    return ApplyOutcome::Ignored;
                };

                if let Some(current) = self.current_version(user_id) {
                    if !self.policy.admits(incoming, current) {
                        return self.stale(event, current);
                    }
                }

                let row = UserViewRow::from_snapshot(user_id, snapshot, incoming, (self.clock)());
                self.store.upsert(user_id, row);
                self.forget_tombstone(user_id);
                ApplyOutcome::Upserted { version: incoming }
            }
            EventType::Deleted => match self.store.get(&user_id) {
                None => {
                    self.remember_tombstone(user_id, incoming);
                    ApplyOutcome::Absent
                }
                Some(row) if !self.policy.admits(incoming, row.version) => {
                    return self.stale(event, row.version);
                }
                Some(_) => {
                    self.store.remove(&user_id);
                    self.remember_tombstone(user_id, incoming);
                    ApplyOutcome::Deleted
                }
            },
        };

        debug!(
            user_id = %user_id,
            event_type = %event.event_type(),
            version = incoming,
            outcome = ?outcome,
            "applied user event to view"
        );
        outcome
    }

    /// Decode and apply one serialized envelope.
    ///
    /// Unknown event types are logged and ignored; anything else that fails
    /// to decode is returned so the caller can log and skip it.
    pub fn apply_record(&self, bytes: &[u8]) -> Result<ApplyOutcome, EnvelopeError> {
        match UserEvent::from_slice(bytes) {
            Ok(event) => Ok(self.apply_envelope(&event)),
            Err(EnvelopeError::UnknownEventType(event_type)) => {
                warn!(event_type = %event_type, "unknown user event type; ignored");
                Ok(ApplyOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    pub fn handle_record(&self, record: &TransportRecord) -> Result<ApplyOutcome, EnvelopeError> {
        self.apply_record(record.value()).inspect_err(|e| {
            warn!(topic = record.topic(), key = record.key(), error = %e, "skipping malformed user event");
        })
    }

    fn current_version(&self, user_id: UserId) -> Option<u64> {
        if let Some(row) = self.store.get(&user_id) {
            return Some(row.version);
        }
        self.store.tombstone(user_id)
    }

    fn stale(&self, event: &UserEvent, current: u64) -> ApplyOutcome {
        debug!(
            user_id = %event.user_id(),
            incoming = event.version(),
            current,
            "stale user event skipped"
        );
        ApplyOutcome::Stale {
            incoming: event.version(),
            current,
        }
    }

    fn remember_tombstone(&self, user_id: UserId, version: u64) {
        if self.policy != ApplyPolicy::LastVersionWins {
            return;
        }
        self.store.record_tombstone(user_id, version);
    }

    fn forget_tombstone(&self, user_id: UserId) {
        self.store.clear_tombstone(user_id);
    }
}
