use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postview_core::{DomainError, DomainResult, PostId, UserId};

/// Client-supplied content of a post.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_id: Option<UserId>,
}

impl PostDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be blank"));
        }
        Ok(())
    }
}

/// Author attributes denormalized from the user view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorFields {
    pub name: String,
    pub email: String,
    pub department: String,
}

/// A post with its denormalized author fields.
///
/// The `author_*` fields are whatever the view held the last time the post
/// was enriched; they may lag the view and are `None` until a first
/// successful enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub author_id: Option<UserId>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_department: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn create(id: PostId, draft: PostDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title,
            content: draft.content,
            author_id: draft.author_id,
            author_name: None,
            author_email: None,
            author_department: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace title, content and author.
    ///
    /// Denormalized fields are kept only while the author stays the same;
    /// switching authors clears them until the next enrichment.
    pub fn apply_update(&mut self, draft: PostDraft, now: DateTime<Utc>) {
        if draft.author_id != self.author_id {
            self.clear_author();
        }
        self.title = draft.title;
        self.content = draft.content;
        self.author_id = draft.author_id;
        self.updated_at = now;
    }

    pub fn set_author(&mut self, author: AuthorFields) {
        self.author_name = Some(author.name);
        self.author_email = Some(author.email);
        self.author_department = Some(author.department);
    }

    pub fn clear_author(&mut self) {
        self.author_name = None;
        self.author_email = None;
        self.author_department = None;
    }

    /// Denormalized fields currently on the post, if it was ever enriched.
    pub fn author(&self) -> Option<AuthorFields> {
        Some(AuthorFields {
            name: self.author_name.clone()?,
            email: self.author_email.clone()?,
            department: self.author_department.clone()?,
        })
    }
}
