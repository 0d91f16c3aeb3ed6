//! Infrastructure for the dependent side: the materialized user view, the
//! projector that feeds it, the enrichment join, and transport/storage
//! adapters.

pub mod enrichment;
pub mod event_bus;
pub mod post_service;
pub mod projections;
pub mod read_model;
pub mod workers;


pub use enrichment::{AuthorEnricher, Enrichment};
pub use post_service::PostService;
pub use projections::user_view::{ApplyOutcome, ApplyPolicy, UserViewProjection};
pub use read_model::{InMemoryUserViewStore, UserViewRow, UserViewStore};
pub use workers::projection_worker::{ProjectionWorker, WorkerHandle};
