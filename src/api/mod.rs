//! HTTP API built on axum.
//!
//! Routes live under `/api/images` and `/api/tags`; stored files are served
//! from `/uploads`. Handlers push SQLite and filesystem work onto the
//! blocking pool.

pub mod errors;
pub mod images;
pub mod ocr;
pub mod settings;
pub mod similarity;
pub mod tags;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::{LlmConfig, SimilarityConfig};
use crate::db::Database;
use crate::ocr::Tesseract;
use crate::storage::{UploadStore, UPLOADS_ROUTE};
use crate::tasks::VectorQueue;
use errors::{ApiError, ResultExt};

/// Largest accepted request body (a full batch of 20 photos)
pub const MAX_BODY_BYTES: usize = 200 * 1024 * 1024;

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub uploads: Arc<UploadStore>,
    pub vectors: VectorQueue,
    pub similarity: SimilarityConfig,
    pub ocr: Arc<Tesseract>,
    pub llm: Arc<RwLock<LlmConfig>>,
    /// Config file that LLM settings changes are written back to
    pub config_path: Option<PathBuf>,
}

impl AppState {
    /// Run store work on the blocking pool.
    pub(crate) async fn with_db<T, F>(&self, message: &str, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .or_internal(message)?
            .or_internal(message)
    }

    pub(crate) fn llm_config(&self) -> Result<LlmConfig, ApiError> {
        self.llm
            .read()
            .map(|config| config.clone())
            .map_err(|_| ApiError::internal("Error reading LLM configuration", "settings lock poisoned"))
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let image_routes = Router::new()
        .route("/", get(images::list_images))
        .route("/upload", post(images::upload_image))
        .route("/batch_upload", post(images::upload_batch))
        .route("/search", get(images::search_images))
        .route("/by-tag", get(images::images_by_tag))
        .route("/ocr", post(ocr::extract_text))
        .route("/ocr-llm", post(ocr::extract_text_llm))
        .route(
            "/llm-config",
            get(settings::get_llm_config).post(settings::update_llm_config),
        )
        .route("/similarity/scan", get(similarity::scan_similar))
        .route("/vectors/generate", post(similarity::generate_vectors))
        .route("/vectors/status", get(similarity::vector_status))
        .route(
            "/:id",
            get(images::get_image)
                .put(images::update_image)
                .delete(images::delete_image),
        );

    let tag_routes = Router::new().route("/", get(tags::list_tags).post(tags::create_tag));

    let uploads = ServeDir::new(state.uploads.dir());

    Router::new()
        .route("/health", get(health))
        .nest("/api/images", image_routes)
        .nest("/api/tags", tag_routes)
        .nest_service(UPLOADS_ROUTE, uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
