//! Post CRUD with author enrichment on every write and read path.
//!
//! Enrichment reads the view at call time and writes the refreshed author
//! fields back onto the stored post, so the stored copy is as fresh as the
//! last access. A view miss never fails the operation.
//!
//! View lookups run on a cloned post with no store lock held; only the
//! write-back of changed fields takes a short per-key `modify`.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;

use postview_core::{DomainError, DomainResult, IdSequence, PostId, UserId};
use postview_posts::{Post, PostDraft, PostStore};

use crate::enrichment::{AuthorEnricher, Enrichment};
use crate::read_model::{UserViewRow, UserViewStore};

pub struct PostService<P, V, Q> {
    posts: P,
    enricher: AuthorEnricher<V>,
    ids: Q,
}

impl<P, V, Q> PostService<P, V, Q>
where
    P: PostStore,
    V: UserViewStore,
    Q: IdSequence,
{
    pub fn new(posts: P, view: V, ids: Q) -> Self {
        Self {
            posts,
            enricher: AuthorEnricher::new(view),
            ids,
        }
    }

    pub fn create(&self, draft: PostDraft) -> DomainResult<Post> {
        draft.validate()?;

        let id = PostId::new(self.ids.next_id());
        let mut post = Post::create(id, draft, Utc::now());
        self.enricher.enrich(&mut post);
        self.posts.upsert(id, post.clone());
        info!(post_id = %id, author_id = ?post.author_id, "post created");
        Ok(post)
    }

    pub fn update(&self, id: PostId, draft: PostDraft) -> DomainResult<Post> {
        draft.validate()?;

        let now = Utc::now();
        let mut draft = Some(draft);
        let post = self
            .posts
            .modify(&id, &mut |p| {
                if let Some(d) = draft.take() {
                    p.apply_update(d, now);
                }
            })
            .ok_or_else(|| DomainError::not_found("post", id))?;
        info!(post_id = %id, "post updated");
        Ok(self.refresh(post))
    }

    pub fn delete(&self, id: PostId) -> DomainResult<()> {
        self.posts
            .remove(&id)
            .ok_or_else(|| DomainError::not_found("post", id))?;
        info!(post_id = %id, "post deleted");
        Ok(())
    }

    pub fn get(&self, id: PostId) -> DomainResult<Post> {
        let post = self
            .posts
            .get(&id)
            .ok_or_else(|| DomainError::not_found("post", id))?;
        Ok(self.refresh(post))
    }

    pub fn list(&self) -> Vec<Post> {
        self.posts
            .list()
            .into_iter()
            .map(|p| self.refresh(p))
            .collect()
    }

    /// Posts whose author currently sits in `department` according to the view.
    pub fn list_by_department(&self, department: &str) -> Vec<Post> {
        let authors: HashSet<UserId> = self
            .enricher
            .view()
            .find_by_department(department)
            .into_iter()
            .map(|row| row.user_id)
            .collect();

        self.posts
            .find_by(&|p| p.author_id.is_some_and(|a| authors.contains(&a)))
            .into_iter()
            .map(|p| self.refresh(p))
            .collect()
    }

    pub fn list_authors(&self) -> Vec<UserViewRow> {
        self.enricher.view().list()
    }

    pub fn list_authors_by_department(&self, department: &str) -> Vec<UserViewRow> {
        self.enricher.view().find_by_department(department)
    }

    pub fn list_authors_by_status(&self, status: &str) -> Vec<UserViewRow> {
        self.enricher.view().find_by_status(status)
    }

    /// Re-enrich a post read from the store and persist any field change.
    fn refresh(&self, stored: Post) -> Post {
        let mut enriched = stored.clone();
        if self.enricher.enrich(&mut enriched) != Enrichment::Applied || enriched == stored {
            return enriched;
        }

        let mut fields = enriched.author();
        self.posts.modify(&enriched.id, &mut |current| {
            // Skip when a concurrent update switched authors since the read.
            if current.author_id != enriched.author_id {
                return;
            }
            if let Some(f) = fields.take() {
                current.set_author(f);
            }
        });
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use postview_core::{InMemoryIdSequence, Store};
    use postview_posts::InMemoryPostStore;

    use crate::read_model::InMemoryUserViewStore;

    type Service = PostService<InMemoryPostStore, Arc<InMemoryUserViewStore>, InMemoryIdSequence>;

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

    fn setup() -> (Service, Arc<InMemoryUserViewStore>) {
        let view = Arc::new(InMemoryUserViewStore::new());
        let svc = PostService::new(InMemoryPostStore::new(), view.clone(), InMemoryIdSequence::new());
        (svc, view)
    }

    fn draft(title: &str, author: Option<i64>) -> PostDraft {
        PostDraft {
            title: title.to_string(),
            content: "body".to_string(),
            author_id: author.map(UserId::new),
        }
    }

    #[test]
    fn create_enriches_from_view() {
        let (svc, view) = setup();
        view.upsert(UserId::new(1), row(1, "Bob", "Eng"));

        let post = svc.create(draft("Hello", Some(1))).unwrap();
        assert_eq!(post.id, PostId::new(1));
        assert_eq!(post.author_name.as_deref(), Some("Bob"));
        assert_eq!(post.author_department.as_deref(), Some("Eng"));
    }

    #[test]
    fn create_succeeds_when_author_is_unknown() {
        let (svc, _view) = setup();
        let post = svc.create(draft("Hello", Some(404))).unwrap();
        assert_eq!(post.author(), None);
        assert_eq!(svc.get(post.id).unwrap().author(), None);
    }

    #[test]
    fn reads_pick_up_view_changes_and_persist_them() {
        let (svc, view) = setup();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        let id = svc.create(draft("Hello", Some(100))).unwrap().id;

        view.upsert(UserId::new(100), row(100, "Alicia", "Eng"));
        assert_eq!(svc.get(id).unwrap().author_name.as_deref(), Some("Alicia"));
        assert_eq!(svc.list()[0].author_name.as_deref(), Some("Alicia"));

        // The refreshed fields survive the author disappearing from the view.
        view.remove(&UserId::new(100));
        assert_eq!(svc.get(id).unwrap().author_name.as_deref(), Some("Alicia"));
    }

    #[test]
    fn update_switching_author_re_enriches() {
        let (svc, view) = setup();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        view.upsert(UserId::new(200), row(200, "Bob", "Sales"));
        let id = svc.create(draft("Hello", Some(100))).unwrap().id;

        let updated = svc.update(id, draft("Hello again", Some(200))).unwrap();
        assert_eq!(updated.title, "Hello again");
        assert_eq!(updated.author_name.as_deref(), Some("Bob"));

        let orphaned = svc.update(id, draft("Hello again", Some(300))).unwrap();
        assert_eq!(orphaned.author(), None);
    }

    #[test]
    fn department_filter_uses_view_membership() {
        let (svc, view) = setup();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        view.upsert(UserId::new(200), row(200, "Bob", "Sales"));

        let eng = svc.create(draft("by alice", Some(100))).unwrap().id;
        svc.create(draft("by bob", Some(200))).unwrap();
        svc.create(draft("anonymous", None)).unwrap();

        let found: Vec<PostId> = svc.list_by_department("Eng").into_iter().map(|p| p.id).collect();
        assert_eq!(found, vec![eng]);
        assert!(svc.list_by_department("Legal").is_empty());
    }

    #[test]
    fn missing_posts_are_not_found() {
        let (svc, _view) = setup();
        let missing = PostId::new(9);
        assert!(svc.get(missing).unwrap_err().is_not_found());
        assert!(svc.update(missing, draft("x", None)).unwrap_err().is_not_found());
        assert!(svc.delete(missing).unwrap_err().is_not_found());
    }

    #[test]
    fn blank_title_is_rejected() {
        let (svc, _view) = setup();
        assert!(matches!(svc.create(draft("  ", None)), Err(DomainError::Validation(_))));
    }

    /// View whose lookups take a while, counting how many overlap.
    struct SlowView {
        inner: InMemoryUserViewStore,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SlowView {
        fn new(delay: Duration) -> Self {
            Self {
                inner: InMemoryUserViewStore::new(),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl Store<UserId, UserViewRow> for SlowView {
        fn get(&self, key: &UserId) -> Option<UserViewRow> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn upsert(&self, key: UserId, value: UserViewRow) {
            self.inner.upsert(key, value)
        }

        fn remove(&self, key: &UserId) -> Option<UserViewRow> {
            self.inner.remove(key)
        }

        fn list(&self) -> Vec<UserViewRow> {
            self.inner.list()
        }

        fn modify(&self, key: &UserId, f: &mut dyn FnMut(&mut UserViewRow)) -> Option<UserViewRow> {
            self.inner.modify(key, f)
        }
    }

    impl UserViewStore for SlowView {
        fn tombstone(&self, user_id: UserId) -> Option<u64> {
            self.inner.tombstone(user_id)
        }

        fn record_tombstone(&self, user_id: UserId, version: u64) {
            self.inner.record_tombstone(user_id, version)
        }

        fn clear_tombstone(&self, user_id: UserId) {
            self.inner.clear_tombstone(user_id)
        }
    }

    #[test]
    fn reads_of_different_posts_overlap_while_the_view_is_slow() {
        let view = Arc::new(SlowView::new(Duration::from_millis(200)));
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        view.upsert(UserId::new(200), row(200, "Bob", "Sales"));

        let posts = Arc::new(InMemoryPostStore::new());
        for (id, author) in [(1, 100), (2, 200)] {
            let post = Post::create(PostId::new(id), draft("Hello", Some(author)), Utc::now());
            posts.upsert(post.id, post);
        }
        let svc = Arc::new(PostService::new(posts.clone(), view.clone(), InMemoryIdSequence::new()));

        let readers: Vec<_> = [1, 2]
            .into_iter()
            .map(|id| {
                let svc = Arc::clone(&svc);
                thread::spawn(move || svc.get(PostId::new(id)).unwrap())
            })
            .collect();
        let names: Vec<Option<String>> = readers
            .into_iter()
            .map(|r| r.join().unwrap().author_name)
            .collect();

        assert_eq!(names, vec![Some("Alice".to_string()), Some("Bob".to_string())]);
        assert_eq!(view.max_in_flight.load(Ordering::SeqCst), 2);
        // The refreshed fields were written back.
        assert_eq!(posts.get(&PostId::new(2)).unwrap().author_name.as_deref(), Some("Bob"));
    }

    #[test]
    fn author_listings_expose_view() {
        let (svc, view) = setup();
        view.upsert(UserId::new(100), row(100, "Alice", "Eng"));
        let mut inactive = row(200, "Bob", "Sales");
        inactive.status = "INACTIVE".to_string();
        view.upsert(UserId::new(200), inactive);

        assert_eq!(svc.list_authors().len(), 2);
        assert_eq!(svc.list_authors_by_department("Sales")[0].name, "Bob");
        assert_eq!(svc.list_authors_by_status("ACTIVE")[0].name, "Alice");
    }
}
