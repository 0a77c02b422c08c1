use axum::Router;

use crate::AppState;

mod error;
mod handlers;
mod routes;

pub use error::AppError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::staging())
        .merge(routes::posts())
        .merge(routes::urls())
        .merge(routes::profiles())
        .with_state(state)
}
