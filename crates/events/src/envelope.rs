use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use postview_core::UserId;

/// Lifecycle change carried by a [`UserEvent`].
///
/// The set is closed: consumers match on it exhaustively. Strings that do not
/// name one of these variants are rejected at decode time with
/// [`EnvelopeError::UnknownEventType`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    /// Wire name written by publishers.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "USER_CREATED",
            EventType::Updated => "USER_UPDATED",
            EventType::Deleted => "USER_DELETED",
        }
    }

    /// Whether events of this type carry a snapshot the view must store.
    pub fn is_upsert(self) -> bool {
        matches!(self, EventType::Created | EventType::Updated)
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    /// Accepts both the prefixed wire names and the bare lifecycle names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_CREATED" | "CREATED" => Ok(EventType::Created),
            "USER_UPDATED" | "UPDATED" => Ok(EventType::Updated),
            "USER_DELETED" | "DELETED" => Ok(EventType::Deleted),
            other => Err(EnvelopeError::UnknownEventType(other.to_string())),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Snapshot of a user's attributes at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<UserId>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Bytes were not a JSON envelope of the expected shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A create/update event arrived without the snapshot it must carry.
    #[error("{event_type} for user {user_id} has no payload")]
    MissingPayload { event_type: EventType, user_id: UserId },

    #[error("version {version} for user {user_id} exceeds {max}", max = MAX_VERSION)]
    VersionOutOfRange { user_id: UserId, version: u64 },
}

/// Highest envelope version accepted on decode; view stores keep versions as
/// signed 64-bit integers.
pub const MAX_VERSION: u64 = i64::MAX as u64;

impl EnvelopeError {
    /// Unknown types are ignored by consumers; everything else is a bad message.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, EnvelopeError::UnknownEventType(_))
    }
}

/// Versioned envelope for one lifecycle change of a user.
///
/// This is the unit published to the `user-events` topic, keyed by `user_id`.
///
/// Notes:
/// - `version` is strictly increasing per user, in emission order.
/// - `timestamp` is informational only; consumers never order by it.
/// - `user` is always present for `Created`/`Updated` (enforced on decode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    event_type: EventType,
    user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserSnapshot>,
    timestamp: DateTime<Utc>,
    version: u64,
}

/// Decode-side shape. `eventType` stays a string so an unknown value can be
/// told apart from a structurally broken message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    event_type: String,
    #[serde(alias = "entityId")]
    user_id: UserId,
    #[serde(default, alias = "payload")]
    user: Option<UserSnapshot>,
    timestamp: DateTime<Utc>,
    version: u64,
}

impl UserEvent {
    pub fn new(
        event_type: EventType,
        user_id: UserId,
        user: Option<UserSnapshot>,
        timestamp: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            event_type,
            user_id,
            user,
            timestamp,
            version,
        }
    }

    pub fn created(user_id: UserId, user: UserSnapshot, version: u64, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventType::Created, user_id, Some(user), timestamp, version)
    }

    pub fn updated(user_id: UserId, user: UserSnapshot, version: u64, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventType::Updated, user_id, Some(user), timestamp, version)
    }

    pub fn deleted(user_id: UserId, version: u64, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventType::Deleted, user_id, None, timestamp, version)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn user(&self) -> Option<&UserSnapshot> {
        self.user.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Transport key: the decimal form of the user id.
    pub fn key(&self) -> String {
        self.user_id.to_string()
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an envelope from its JSON wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        let event_type = wire.event_type.parse::<EventType>()?;

        if event_type.is_upsert() && wire.user.is_none() {
            return Err(EnvelopeError::MissingPayload {
                event_type,
                user_id: wire.user_id,
            });
        }

        if wire.version > MAX_VERSION {
            return Err(EnvelopeError::VersionOutOfRange {
                user_id: wire.user_id,
                version: wire.version,
            });
        }

        Ok(Self {
            event_type,
            user_id: wire.user_id,
            user: wire.user,
            timestamp: wire.timestamp,
            version: wire.version,
        })
    }
}
