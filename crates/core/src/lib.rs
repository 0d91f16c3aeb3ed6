//! `postview-core`: shared building blocks for both sides of the user view.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod sequence;
pub mod store;

pub use error::{DomainError, DomainResult};
pub use id::{PostId, UserId};
pub use sequence::{IdSequence, InMemoryIdSequence};
pub use store::{InMemoryStore, Store};
