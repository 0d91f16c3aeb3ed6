use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postview_core::{DomainError, DomainResult, UserId};
use postview_events::UserSnapshot;

/// Client-supplied attributes for creating or replacing a user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub status: String,
}

impl UserDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name must not be blank"));
        }
        if self.email.trim().is_empty() {
            return Err(DomainError::validation("email must not be blank"));
        }
        Ok(())
    }
}

/// A user profile as held by the owning side.
///
/// `version` counts committed mutations: 1 after create, +1 per update.
/// It is what the published envelopes carry, so the view can discard
/// anything older than what it already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: UserId,
    name: String,
    email: String,
    department: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl User {
    pub fn create(id: UserId, draft: UserDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            email: draft.email,
            department: draft.department,
            status: draft.status,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Replace the mutable attributes, keeping identity and creation time.
    pub fn apply_update(&mut self, draft: UserDraft, now: DateTime<Utc>) {
        self.name = draft.name;
        self.email = draft.email;
        self.department = draft.department;
        self.status = draft.status;
        self.updated_at = now;
        self.version += 1;
    }

    /// Version the deletion of this user is published under.
    pub fn tombstone_version(&self) -> u64 {
        self.version + 1
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn department(&self) -> &str {
        &self.department
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: Some(self.id),
            name: self.name.clone(),
            email: self.email.clone(),
            department: self.department.clone(),
            status: self.status.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> UserDraft {
        UserDraft {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            department: "Eng".to_string(),
            status: "ACTIVE".to_string(),
        }
    }

    #[test]
    fn update_keeps_identity_and_bumps_version() {
        let t0 = Utc::now();
        let mut user = User::create(UserId::new(1), draft("Alice"), t0);
        assert_eq!(user.version(), 1);

        let t1 = t0 + chrono::Duration::seconds(5);
        user.apply_update(draft("Alicia"), t1);

        assert_eq!(user.id(), UserId::new(1));
        assert_eq!(user.name(), "Alicia");
        assert_eq!(user.created_at(), t0);
        assert_eq!(user.updated_at(), t1);
        assert_eq!(user.version(), 2);
        assert_eq!(user.tombstone_version(), 3);
    }

    #[test]
    fn blank_names_are_rejected() {
        let err = draft("  ").validate().unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn serializes_camel_case() {
        let user = User::create(UserId::new(3), draft("Bob"), Utc::now());
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["id"], 3);
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["version"], 1);
    }
}
