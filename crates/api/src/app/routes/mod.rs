use axum::Router;

pub mod posts;
pub mod system;
pub mod users;

/// Router for all `/api` endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/api/users", users::router())
        .nest("/api/posts", posts::router())
}
