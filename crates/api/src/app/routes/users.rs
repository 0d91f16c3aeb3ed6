//! Owning-side user endpoints.
//!
//! A mutation answers as soon as it is committed locally; whether its event
//! reached the transport only shows up in the logs. Service calls wait for
//! the publish acknowledgement, so they run on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use postview_core::UserId;
use postview_users::UserDraft;

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_user).get(list_users))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
}

pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<UserDraft>,
) -> axum::response::Response {
    match errors::run_blocking(move || services.users.create(body)).await {
        Ok(Ok(committed)) => (StatusCode::CREATED, Json(committed.into_value())).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn list_users(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match errors::run_blocking(move || services.users.list()).await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.users.get(id)).await {
        Ok(Ok(user)) => (StatusCode::OK, Json(user)).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<UserDraft>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.users.update(id, body)).await {
        Ok(Ok(committed)) => (StatusCode::OK, Json(committed.into_value())).into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: UserId = match errors::parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match errors::run_blocking(move || services.users.delete(id)).await {
        Ok(Ok(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(e)) => errors::domain_error_to_response(e),
        Err(resp) => resp,
    }
}
