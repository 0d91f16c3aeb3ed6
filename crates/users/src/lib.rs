//! Owning side of the user profile: local CRUD plus best-effort publication of
//! every committed mutation as a [`UserEvent`](postview_events::UserEvent).

pub mod publisher;
pub mod service;
pub mod user;

pub use publisher::{EventPublisher, PublishError};
pub use service::{Committed, PublishStatus, UserService};
pub use user::{User, UserDraft};
