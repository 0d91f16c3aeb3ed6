//! Materialized user view storage.

pub mod user_view;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use user_view::{InMemoryUserViewStore, UserViewRow, UserViewStore};

#[cfg(feature = "postgres")]
pub use postgres::PostgresUserViewStore;
