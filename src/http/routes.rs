use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn staging() -> Router<AppState> {
    Router::new()
        .route("/v1/users/:owner_id/staging", get(handlers::list_staged))
        .route("/v1/users/:owner_id/staging", delete(handlers::clear_staged))
        .route("/v1/users/:owner_id/staging/library", post(handlers::stage_from_library))
        .route("/v1/users/:owner_id/staging/camera", post(handlers::stage_from_camera))
        .route(
            "/v1/users/:owner_id/staging/:local_id",
            delete(handlers::remove_staged),
        )
        .route(
            "/v1/users/:owner_id/staging/:local_id/thumbnail",
            get(handlers::get_thumbnail),
        )
        .route(
            "/v1/users/:owner_id/staging/:local_id/thumbnail/retry",
            post(handlers::retry_thumbnail),
        )
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/v1/links/:link_id/posts", post(handlers::publish))
        .route("/v1/posts/:id/resume", post(handlers::resume_publish))
        .route("/v1/posts/:id/media", get(handlers::list_post_media))
        .route("/v1/posts/:id", delete(handlers::delete_post))
}

pub fn urls() -> Router<AppState> {
    Router::new().route("/v1/urls/resolve", post(handlers::resolve_urls))
}

pub fn profiles() -> Router<AppState> {
    Router::new()
        .route("/v1/parties/:id/banner/crop", post(handlers::recrop_banner))
        .route("/v1/users/:owner_id/avatar", post(handlers::set_avatar))
}
