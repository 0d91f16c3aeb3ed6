//! Read-time join of the user view onto posts.

use tracing::{debug, warn};

use postview_core::UserId;
use postview_posts::{AuthorFields, Post};

use crate::read_model::{UserViewRow, UserViewStore};

/// Result of enriching one post.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Enrichment {
    /// Author fields copied from the view.
    Applied,
    /// The view holds no row for this author; the post keeps whatever it had.
    Missing(UserId),
    /// The post has no author.
    NoAuthor,
}

/// Copies author attributes from the materialized view onto posts.
///
/// Every call reads the view afresh; nothing is cached here.
#[derive(Debug, Clone)]
pub struct AuthorEnricher<V> {
    view: V,
}

impl<V> AuthorEnricher<V>
where
    V: UserViewStore,
{
    pub fn new(view: V) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn enrich(&self, post: &mut Post) -> Enrichment {
        let Some(author_id) = post.author_id else {
            return Enrichment::NoAuthor;
        };

        match self.view.get(&author_id) {
            Some(row) => {
                post.set_author(author_fields(&row));
                debug!(post_id = %post.id, author_id = %author_id, "post enriched");
                Enrichment::Applied
            }
            None => {
                warn!(
                    post_id = %post.id,
                    author_id = %author_id,
                    "user not found in materialized view; author fields left as-is"
                );
                Enrichment::Missing(author_id)
            }
        }
    }
}

fn author_fields(row: &UserViewRow) -> AuthorFields {
    AuthorFields {
        name: row.name.clone(),
        email: row.email.clone(),
        department: row.department.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use chrono::Utc;
    use postview_core::{PostId, Store};
    use postview_events::{UserEvent, UserSnapshot};
    use postview_posts::PostDraft;

    use crate::projections::UserViewProjection;
    use crate::read_model::InMemoryUserViewStore;

    fn row(id: i64, name: &str, department: &str) -> UserViewRow {
        let now = Utc::now();
        UserViewRow {
            user_id: UserId::new(id),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            department: department.to_string(),
            status: "ACTIVE".to_string(),
            created_at: now,
            updated_at: now,
            version: 1,
            last_processed_at: now,
        }
    }

    fn post(author: Option<i64>) -> Post {
        Post::create(
            PostId::new(1),
            PostDraft {
                title: "Hello".to_string(),
                content: String::new(),
                author_id: author.map(UserId::new),
            },
            Utc::now(),
        )
    }

    #[test]
    fn copies_fields_when_author_is_in_view() {
        let view = InMemoryUserViewStore::new();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        let enricher = AuthorEnricher::new(view);

        let mut p = post(Some(100));
        assert_eq!(enricher.enrich(&mut p), Enrichment::Applied);
        assert_eq!(p.author_name.as_deref(), Some("Alice"));
        assert_eq!(p.author_email.as_deref(), Some("alice@example.com"));
        assert_eq!(p.author_department.as_deref(), Some("Eng"));
    }

    #[test]
    fn miss_leaves_fields_unset() {
        let enricher = AuthorEnricher::new(InMemoryUserViewStore::new());

        let mut p = post(Some(100));
        assert_eq!(enricher.enrich(&mut p), Enrichment::Missing(UserId::new(100)));
        assert_eq!(p.author(), None);
    }

    #[test]
    fn miss_keeps_previous_fields() {
        let view = InMemoryUserViewStore::new();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        let enricher = AuthorEnricher::new(view);

        let mut p = post(Some(100));
        enricher.enrich(&mut p);
        enricher.view().remove(&UserId::new(100));

        assert_eq!(enricher.enrich(&mut p), Enrichment::Missing(UserId::new(100)));
        assert_eq!(p.author_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn reflects_latest_view_state() {
        let view = InMemoryUserViewStore::new();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        let enricher = AuthorEnricher::new(view);

        let mut p = post(Some(100));
        enricher.enrich(&mut p);
        enricher.view().upsert(UserId::new(100), row(100, "Alicia", "Eng"));
        enricher.enrich(&mut p);

        assert_eq!(p.author_name.as_deref(), Some("Alicia"));
        assert_eq!(p.author_email.as_deref(), Some("alicia@example.com"));
    }

    #[test]
    fn authorless_post_is_untouched() {
        let enricher = AuthorEnricher::new(InMemoryUserViewStore::new());
        let mut p = post(None);
        assert_eq!(enricher.enrich(&mut p), Enrichment::NoAuthor);
        assert_eq!(p.author(), None);
    }

    fn snapshot(name: &str, department: &str) -> UserSnapshot {
        let at = Utc::now();
        UserSnapshot {
            id: Some(UserId::new(100)),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            department: department.to_string(),
            status: "ACTIVE".to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn reads_during_projection_see_one_whole_version() {
        let view = Arc::new(InMemoryUserViewStore::new());
        let projection = UserViewProjection::new(view.clone());
        projection.apply_envelope(&UserEvent::created(UserId::new(100), snapshot("Alice", "Eng"), 1, Utc::now()));

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut version: u64 = 1;
                loop {
                    version += 1;
                    let (name, department) = if version % 2 == 0 { ("Alicia", "Research") } else { ("Alice", "Eng") };
                    projection.apply_envelope(&UserEvent::updated(
                        UserId::new(100),
                        snapshot(name, department),
                        version,
                        Utc::now(),
                    ));
                    if stop.load(Ordering::Relaxed) {
                        break version;
                    }
                }
            })
        };

        let enricher = AuthorEnricher::new(view);
        let consistent = [
            ("Alice", "alice@example.com", "Eng"),
            ("Alicia", "alicia@example.com", "Research"),
        ];
        for _ in 0..5_000 {
            let mut p = post(Some(100));
            assert_eq!(enricher.enrich(&mut p), Enrichment::Applied);
            let author = p.author().unwrap();
            let seen = (author.name.as_str(), author.email.as_str(), author.department.as_str());
            assert!(consistent.contains(&seen), "mixed author fields: {author:?}");
        }

        stop.store(true, Ordering::Relaxed);
        assert!(writer.join().unwrap() > 1);
    }
}
