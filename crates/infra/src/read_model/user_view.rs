use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postview_core::{InMemoryStore, Store, UserId};
use postview_events::UserSnapshot;

/// Last-known-good snapshot of one user, as projected from the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserViewRow {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub department: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Version of the last create/update event applied to this row.
    pub version: u64,
    /// Local wall-clock time of the last successful apply.
    pub last_processed_at: DateTime<Utc>,
}

impl UserViewRow {
    pub fn from_snapshot(
        user_id: UserId,
        snapshot: &UserSnapshot,
        version: u64,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            name: snapshot.name.clone(),
            email: snapshot.email.clone(),
            department: snapshot.department.clone(),
            status: snapshot.status.clone(),
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            version,
            last_processed_at: processed_at,
        }
    }
}

/// Keyed store behind the materialized view.
///
/// The projector is its only writer; enrichment and listing queries only read.
/// The field queries have scan-based defaults; a database-backed store
/// overrides them with indexed lookups.
///
/// Besides rows the store keeps one delete marker per removed user: the
/// version it was deleted at. Keeping it next to the rows means a restarted
/// projector still rejects late upserts for deleted users. A marker is
/// dropped as soon as a newer upsert brings the user back.
pub trait UserViewStore: Store<UserId, UserViewRow> {
    /// Version `user_id` was deleted at, if a delete is remembered.
    fn tombstone(&self, user_id: UserId) -> Option<u64>;

    /// Remember a delete at `version`; an existing higher marker wins.
    fn record_tombstone(&self, user_id: UserId, version: u64);

    fn clear_tombstone(&self, user_id: UserId);

    fn find_by_department(&self, department: &str) -> Vec<UserViewRow> {
        self.find_by(&|row| row.department == department)
    }

    fn find_by_status(&self, status: &str) -> Vec<UserViewRow> {
        self.find_by(&|row| row.status == status)
    }

    fn find_by_name_containing(&self, fragment: &str) -> Vec<UserViewRow> {
        self.find_by(&|row| row.name.contains(fragment))
    }
}

impl<S> UserViewStore for Arc<S>
where
    S: UserViewStore + ?Sized,
{
    fn tombstone(&self, user_id: UserId) -> Option<u64> {
        (**self).tombstone(user_id)
    }

    fn record_tombstone(&self, user_id: UserId, version: u64) {
        (**self).record_tombstone(user_id, version)
    }

    fn clear_tombstone(&self, user_id: UserId) {
        (**self).clear_tombstone(user_id)
    }

    fn find_by_department(&self, department: &str) -> Vec<UserViewRow> {
        (**self).find_by_department(department)
    }

    fn find_by_status(&self, status: &str) -> Vec<UserViewRow> {
        (**self).find_by_status(status)
    }

    fn find_by_name_containing(&self, fragment: &str) -> Vec<UserViewRow> {
        (**self).find_by_name_containing(fragment)
    }
}

/// In-memory view store (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryUserViewStore {
    rows: InMemoryStore<UserId, UserViewRow>,
    tombstones: InMemoryStore<UserId, u64>,
}

impl InMemoryUserViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store<UserId, UserViewRow> for InMemoryUserViewStore {
    fn get(&self, key: &UserId) -> Option<UserViewRow> {
        self.rows.get(key)
    }

    fn upsert(&self, key: UserId, value: UserViewRow) {
        self.rows.upsert(key, value)
    }

    fn remove(&self, key: &UserId) -> Option<UserViewRow> {
        self.rows.remove(key)
    }

    fn list(&self) -> Vec<UserViewRow> {
        self.rows.list()
    }

    fn modify(&self, key: &UserId, f: &mut dyn FnMut(&mut UserViewRow)) -> Option<UserViewRow> {
        self.rows.modify(key, f)
    }

    fn find_by(&self, predicate: &dyn Fn(&UserViewRow) -> bool) -> Vec<UserViewRow> {
        self.rows.find_by(predicate)
    }
}

impl UserViewStore for InMemoryUserViewStore {
    fn tombstone(&self, user_id: UserId) -> Option<u64> {
        self.tombstones.get(&user_id)
    }

    fn record_tombstone(&self, user_id: UserId, version: u64) {
        // Single writer per key, so modify-then-insert does not race.
        if self
            .tombstones
            .modify(&user_id, &mut |v| *v = (*v).max(version))
            .is_none()
        {
            self.tombstones.upsert(user_id, version);
        }
    }

    fn clear_tombstone(&self, user_id: UserId) {
        self.tombstones.remove(&user_id);
    }
}
