mod auth;
mod galleries;

use crate::auth::AppState;
use axum::Router;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(galleries::router())
}
