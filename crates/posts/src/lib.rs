//! Locally owned posts and the author fields they carry from the user view.

pub mod post;

pub use post::{AuthorFields, Post, PostDraft};

use postview_core::{InMemoryStore, PostId, Store};

/// Storage for posts, keyed by post id.
pub trait PostStore: Store<PostId, Post> {}

impl<S> PostStore for S where S: Store<PostId, Post> {}

/// In-memory post store (tests/dev).
pub type InMemoryPostStore = InMemoryStore<PostId, Post>;
