//! Wiring the configured services into a running HTTP server.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::db::Database;
use crate::embedding::{ProcessExtractor, VectorExtractor};
use crate::ocr::Tesseract;
use crate::storage::UploadStore;
use crate::tasks::{VectorQueue, VectorWorker};

/// Open and migrate the configured database.
pub fn open_database(config: &Config) -> Result<Arc<Database>> {
    let db = Database::open(&config.storage.db_path)?;
    db.initialize().context("Failed to initialize database schema")?;
    Ok(Arc::new(db))
}

/// Build handler state. Must run inside a tokio runtime, since it starts the
/// vector queue dispatcher.
pub fn build_state(
    config: &Config,
    db: Arc<Database>,
    extractor: Arc<dyn VectorExtractor>,
    config_path: Option<PathBuf>,
) -> Result<AppState> {
    let uploads = UploadStore::new(&config.storage.uploads_dir, &config.server.public_url);
    uploads.ensure_dir()?;

    let worker = VectorWorker::new(
        Arc::clone(&db),
        extractor,
        config.storage.uploads_dir.clone(),
    );
    let vectors = VectorQueue::start(worker, config.embedding.max_concurrent);

    Ok(AppState {
        db,
        uploads: Arc::new(uploads),
        vectors,
        similarity: config.similarity.clone(),
        ocr: Arc::new(Tesseract::from_config(&config.ocr)),
        llm: Arc::new(RwLock::new(config.llm.clone())),
        config_path,
    })
}

/// Serve until Ctrl-C.
pub async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let db = open_database(&config)?;
    let extractor: Arc<dyn VectorExtractor> = Arc::new(ProcessExtractor::from_config(&config.embedding));
    let state = build_state(&config, db, extractor, config_path)?;

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.server.host, config.server.port))?;
    let addr = listener.local_addr()?;

    tracing::info!(
        %addr,
        db = %config.storage.db_path.display(),
        uploads = %config.storage.uploads_dir.display(),
        strategy = ?config.similarity.strategy,
        "Server listening"
    );

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
