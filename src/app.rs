use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::AppState;
use crate::config::Config;
use crate::database::DbPool;
use crate::logging::request_logger;
use crate::media_host::{BlobFetcher, MediaHost};
use crate::routes::api_router;
use crate::VERSION;

#[derive(Serialize)]
struct HealthcheckResponse {
    status: String,
    version: String,
}

async fn healthcheck() -> Json<HealthcheckResponse> {
    Json(HealthcheckResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

pub fn create_app(
    config: Arc<Config>,
    pool: DbPool,
    media_host: Arc<dyn MediaHost>,
    fetcher: Arc<dyn BlobFetcher>,
) -> Router {
    let state = AppState {
        config,
        pool,
        media_host,
        fetcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/healthcheck", get(healthcheck))
        .merge(api_router());

    let mut app = Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn(request_logger))
        .layer(cors)
        .with_state(state);

    // Serve the built frontend if it exists
    let static_dir = std::env::var("LENSHARE_STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("../frontend/dist"));

    if static_dir.exists() {
        app = app.fallback(move |req: Request<Body>| {
            let static_dir = static_dir.clone();
            async move {
                let path = req.uri().path().trim_start_matches('/');

                let file_path = static_dir.join(path);
                if file_path.exists() && file_path.is_file() {
                    return serve_static_file(file_path).await;
                }

                // Fall back to index.html for SPA routing
                let index_path = static_dir.join("index.html");
                if index_path.exists() {
                    return serve_static_file(index_path).await;
                }

                (StatusCode::NOT_FOUND, "Not Found").into_response()
            }
        });
    }

    app
}

async fn serve_static_file(path: PathBuf) -> Response {
    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let mime_type = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();

            match Response::builder()
                .status(StatusCode::OK)
                .header("content-type", mime_type)
                .body(Body::from(contents))
            {
                Ok(response) => response,
                Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response(),
            }
        }
        Err(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}
