//! User CRUD with commit-then-publish semantics.
//!
//! Every mutation runs in two phases:
//! 1. commit the change to the local store (this decides success),
//! 2. attempt to publish the matching envelope.
//!
//! Phase 2 has its own failure channel ([`PublishStatus`]); a failed publish
//! is logged and reported alongside the committed value, never as an error.

use chrono::Utc;
use tracing::{error, info};

use postview_core::{DomainError, DomainResult, IdSequence, Store, UserId};
use postview_events::EventType;

use crate::publisher::{EventPublisher, PublishError};
use crate::user::{User, UserDraft};

/// Outcome of the publication phase.
#[derive(Debug)]
pub enum PublishStatus {
    Published,
    Failed(PublishError),
}

/// A locally committed mutation plus what happened when publishing it.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub publish: PublishStatus,
}

impl<T> Committed<T> {
    pub fn is_published(&self) -> bool {
        matches!(self.publish, PublishStatus::Published)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Owning-side user service.
pub struct UserService<S, Q> {
    store: S,
    ids: Q,
    publisher: EventPublisher,
}

impl<S, Q> UserService<S, Q>
where
    S: Store<UserId, User>,
    Q: IdSequence,
{
    pub fn new(store: S, ids: Q, publisher: EventPublisher) -> Self {
        Self { store, ids, publisher }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn create(&self, draft: UserDraft) -> DomainResult<Committed<User>> {
        draft.validate()?;

        let id = UserId::new(self.ids.next_id());
        let user = User::create(id, draft, Utc::now());
        self.store.upsert(id, user.clone());
        info!(user_id = %id, "user created");

        let publish = self.publish_after_commit(&user, EventType::Created);
        Ok(Committed { value: user, publish })
    }

    pub fn update(&self, id: UserId, draft: UserDraft) -> DomainResult<Committed<User>> {
        draft.validate()?;

        let now = Utc::now();
        let mut draft = Some(draft);
        let user = self
            .store
            .modify(&id, &mut |u| {
                if let Some(d) = draft.take() {
                    u.apply_update(d, now);
                }
            })
            .ok_or_else(|| DomainError::not_found("user", id))?;
        info!(user_id = %id, version = user.version(), "user updated");

        let publish = self.publish_after_commit(&user, EventType::Updated);
        Ok(Committed { value: user, publish })
    }

    pub fn delete(&self, id: UserId) -> DomainResult<Committed<()>> {
        let removed = self
            .store
            .remove(&id)
            .ok_or_else(|| DomainError::not_found("user", id))?;
        info!(user_id = %id, "user deleted");

        let publish = self.publish_after_commit(&removed, EventType::Deleted);
        Ok(Committed { value: (), publish })
    }

    pub fn get(&self, id: UserId) -> DomainResult<User> {
        self.store
            .get(&id)
            .ok_or_else(|| DomainError::not_found("user", id))
    }

    pub fn list(&self) -> Vec<User> {
        self.store.list()
    }

    fn publish_after_commit(&self, user: &User, event_type: EventType) -> PublishStatus {
        match self.publisher.publish(user, event_type) {
            Ok(()) => PublishStatus::Published,
            Err(e) => {
                error!(
                    user_id = %user.id(),
                    event_type = %event_type,
                    error = %e,
                    "failed to publish user event; local change kept"
                );
                PublishStatus::Failed(e)
            }
        }
    }
}
