//! Projections that build read models from the user event stream.
//!
//! Projections are idempotent under at-least-once delivery and rely on the
//! transport for per-key ordering.

pub mod user_view;

pub use user_view::{ApplyOutcome, ApplyPolicy, UserViewProjection};
