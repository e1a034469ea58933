use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::errors::ApiError;
use super::AppState;
use crate::config::SimilarityStrategy;
use crate::similarity::{self, parse_threshold, HashEngine, SimilarityPair, VectorEngine};

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    threshold: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub results: Vec<SimilarityPair>,
    pub threshold: f64,
}

pub async fn scan_similar(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<ScanResponse>, ApiError> {
    let threshold = parse_threshold(query.threshold.as_deref(), state.similarity.default_threshold);
    let strategy = state.similarity.strategy;
    let uploads_dir = state.uploads.dir().to_path_buf();

    let results = state
        .with_db("Error scanning image similarity", move |db| {
            let images = db.get_all_images()?;
            Ok(match strategy {
                SimilarityStrategy::Vector => similarity::scan(&VectorEngine, &images, threshold),
                SimilarityStrategy::Hash => similarity::scan(&HashEngine::new(uploads_dir), &images, threshold),
            })
        })
        .await?;

    tracing::info!(threshold, pairs = results.len(), "Similarity scan finished");
    Ok(Json(ScanResponse { results, threshold }))
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub message: String,
    pub queued: usize,
}

/// Queue every image without a vector. Returns immediately.
pub async fn generate_vectors(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let pending = state
        .with_db("Error queueing vector generation", |db| db.get_images_without_vector())
        .await?;

    let queued = state.vectors.enqueue_all(pending);
    let message = if queued == 0 {
        "All images already have vectors".to_string()
    } else {
        format!("Vector generation started for {} images", queued)
    };

    Ok((StatusCode::ACCEPTED, Json(GenerateResponse { message, queued })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStatus {
    pub total: i64,
    pub with_vector: i64,
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
}

pub async fn vector_status(State(state): State<AppState>) -> Result<Json<VectorStatus>, ApiError> {
    let (total, with_vector) = state
        .with_db("Error reading vector status", |db| {
            Ok((db.count_images()?, db.count_vectors()?))
        })
        .await?;

    let stats = state.vectors.stats();
    Ok(Json(VectorStatus {
        total,
        with_vector,
        queued: stats.queued,
        completed: stats.completed,
        failed: stats.failed,
    }))
}
