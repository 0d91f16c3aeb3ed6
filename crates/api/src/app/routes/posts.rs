use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use postview_core::PostId;
use postview_posts::PostDraft;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_post).get(list_posts))
        .route("/:id", get(get_post).put(update_post).delete(delete_post))
        .route("/by-department/:department", get(list_posts_by_department))
        .route("/users", get(list_authors))
        .route("/users/department/:department", get(list_authors_by_department))
        .route("/users/status/:status", get(list_authors_by_status))
}

pub async fn create_post(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<PostDraft>,
) -> axum::response::Response {
    match errors::run_blocking(move || services.posts.create(body)).await {
        Ok(Ok(post)) => (StatusCode::CREATED, Json(post)).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn list_posts(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    json_list(errors::run_blocking(move || services.posts.list()).await)
}

pub async fn get_post(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PostId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.posts.get(id)).await {
        Ok(Ok(post)) => (StatusCode::OK, Json(post)).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn update_post(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<PostDraft>,
) -> axum::response::Response {
    let id: PostId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.posts.update(id, body)).await {
        Ok(Ok(post)) => (StatusCode::OK, Json(post)).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn delete_post(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: PostId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.posts.delete(id)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn list_posts_by_department(
    Extension(services): Extension<Arc<AppServices>>,
    Path(department): Path<String>,
) -> axum::response::Response {
    json_list(errors::run_blocking(move || services.posts.list_by_department(&department)).await)
}

/// Everything the materialized view currently holds.
pub async fn list_authors(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    json_list(errors::run_blocking(move || services.posts.list_authors()).await)
}

pub async fn list_authors_by_department(
    Extension(services): Extension<Arc<AppServices>>,
    Path(department): Path<String>,
) -> axum::response::Response {
    json_list(errors::run_blocking(move || services.posts.list_authors_by_department(&department)).await)
}

pub async fn list_authors_by_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(status): Path<String>,
) -> axum::response::Response {
    json_list(errors::run_blocking(move || services.posts.list_authors_by_status(&status)).await)
}

fn json_list<T: Serialize>(items: Result<Vec<T>, axum::response::Response>) -> axum::response::Response {
    match items {
        Ok(items) => (StatusCode::OK, Json(items)).into_response(),
        Err(resp) => resp,
    }
}
