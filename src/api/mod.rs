pub mod dto;
pub mod errors;
pub mod handlers;
pub mod ws;

use std::path::PathBuf;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::ingest::IngestService;
use handlers::ApiDoc;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: IngestService,
    pub index_html_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/log", get(handlers::log_reading).post(handlers::log_batch))
        .route("/dados", get(handlers::get_all_series))
        .route("/dados/{endereco}", get(handlers::get_series))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .route("/", get(handlers::index))
        .with_state(state)
        .split_for_parts();

    router
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
