//! Background embedding computation.
//!
//! Request handlers hand images to a [`VectorQueue`] and return immediately.
//! A dispatcher task drains the queue and runs jobs under a semaphore, so at
//! most `max_concurrent` embedding processes are alive at once. A failed or
//! panicking job only bumps the `failed` counter.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

use crate::db::{Database, PendingVector};
use crate::embedding::VectorExtractor;
use crate::storage::resolve_image_path;

/// Outcome of a single embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Stored,
    /// File missing, extractor failure, or the image was deleted meanwhile.
    Skipped,
}

/// Computes and stores the vector for one image.
pub struct VectorWorker {
    db: Arc<Database>,
    extractor: Arc<dyn VectorExtractor>,
    uploads_dir: PathBuf,
}

impl VectorWorker {
    pub fn new(db: Arc<Database>, extractor: Arc<dyn VectorExtractor>, uploads_dir: PathBuf) -> Self {
        Self {
            db,
            extractor,
            uploads_dir,
        }
    }

    pub async fn process(&self, job: &PendingVector) -> Result<JobOutcome> {
        let Some(path) = resolve_image_path(&job.url, &self.uploads_dir) else {
            tracing::warn!(image_id = %job.image_id, url = %job.url, "Could not resolve image file");
            return Ok(JobOutcome::Skipped);
        };

        let Some(vector) = self.extractor.extract(&path).await else {
            tracing::warn!(image_id = %job.image_id, "Failed to calculate vector");
            return Ok(JobOutcome::Skipped);
        };

        let db = Arc::clone(&self.db);
        let image_id = job.image_id.clone();
        let dimensions = vector.len();
        let stored = tokio::task::spawn_blocking(move || db.set_image_vector(&image_id, Some(vector.as_slice())))
            .await
            .context("Vector store task panicked")??;

        if stored {
            tracing::info!(image_id = %job.image_id, dimensions, "Stored image vector");
            Ok(JobOutcome::Stored)
        } else {
            tracing::debug!(image_id = %job.image_id, "Image deleted before its vector was stored");
            Ok(JobOutcome::Skipped)
        }
    }

    /// Process jobs one after another. Failures are counted, never raised.
    pub async fn run_batch(&self, jobs: Vec<PendingVector>) -> BatchReport {
        let mut report = BatchReport {
            total: jobs.len(),
            ..Default::default()
        };

        for job in &jobs {
            match self.process(job).await {
                Ok(JobOutcome::Stored) => report.stored += 1,
                Ok(JobOutcome::Skipped) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(image_id = %job.image_id, error = %e, "Vector job failed");
                }
            }
        }

        report
    }
}

/// Summary of a synchronous batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub stored: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Jobs waiting or running
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Handle for submitting embedding jobs. Cheap to clone.
#[derive(Clone)]
pub struct VectorQueue {
    tx: mpsc::UnboundedSender<PendingVector>,
    counters: Arc<Counters>,
}

impl VectorQueue {
    /// Spawn the dispatcher on the current tokio runtime.
    pub fn start(worker: VectorWorker, max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        tokio::spawn(dispatch(
            rx,
            Arc::new(worker),
            Arc::new(Semaphore::new(max_concurrent.max(1))),
            Arc::clone(&counters),
        ));

        Self { tx, counters }
    }

    /// Queue one image. Returns false if the dispatcher has stopped.
    pub fn enqueue(&self, job: PendingVector) -> bool {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        match self.tx.send(job) {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                tracing::error!(image_id = %job.image_id, "Vector queue is closed");
                false
            }
        }
    }

    /// Queue every image, returning how many were accepted
    pub fn enqueue_all(&self, jobs: Vec<PendingVector>) -> usize {
        jobs.into_iter().filter(|job| self.enqueue(job.clone())).count()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.counters.queued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<PendingVector>,
    worker: Arc<VectorWorker>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };

        let worker = Arc::clone(&worker);
        let counters = Arc::clone(&counters);

        tokio::spawn(async move {
            let _permit = permit;
            let image_id = job.image_id.clone();

            // Run in its own task so a panic is observed as a JoinError
            let result = tokio::spawn(async move { worker.process(&job).await }).await;

            let succeeded = match result {
                Ok(Ok(JobOutcome::Stored)) => true,
                Ok(Ok(JobOutcome::Skipped)) => false,
                Ok(Err(e)) => {
                    tracing::error!(image_id = %image_id, error = %e, "Vector job failed");
                    false
                }
                Err(e) => {
                    tracing::error!(image_id = %image_id, error = %e, "Vector job panicked");
                    false
                }
            };

            if succeeded {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            } else {
                counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            counters.queued.fetch_sub(1, Ordering::SeqCst);
        });
    }

    tracing::debug!("Vector queue dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewImage;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Returns a fixed vector unless the file name contains "bad".
    struct FakeExtractor;

    #[async_trait]
    impl VectorExtractor for FakeExtractor {
        async fn extract(&self, path: &Path) -> Option<Vec<f32>> {
            let name = path.file_name()?.to_string_lossy().to_string();
            (!name.contains("bad")).then(|| vec![name.len() as f32, 1.0])
        }
    }

    fn setup(files: &[&str]) -> (Arc<Database>, VectorWorker, Vec<PendingVector>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();

        let mut jobs = Vec::new();
        for name in files {
            std::fs::write(dir.path().join(name), b"img").unwrap();
            let image = db
                .create_image(NewImage {
                    url: format!("http://localhost:5000/uploads/{}", name),
                    ..Default::default()
                })
                .unwrap();
            jobs.push(PendingVector { image_id: image.id, url: image.url });
        }

        let worker = VectorWorker::new(Arc::clone(&db), Arc::new(FakeExtractor), dir.path().to_path_buf());
        (db, worker, jobs, dir)
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let (db, worker, mut jobs, _dir) = setup(&["one.png", "bad.png", "three.png"]);
        jobs.push(PendingVector {
            image_id: "ghost".to_string(),
            url: "/uploads/missing.png".to_string(),
        });

        let report = worker.run_batch(jobs).await;

        assert_eq!(report, BatchReport { total: 4, stored: 2, failed: 2 });
        assert_eq!(db.count_vectors().unwrap(), 2);
        assert_eq!(db.get_images_without_vector().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_drains_and_counts() {
        let (db, worker, jobs, _dir) = setup(&["a.png", "bad.png", "c.png"]);
        let queue = VectorQueue::start(worker, 2);

        assert_eq!(queue.enqueue_all(jobs), 3);

        let mut stats = queue.stats();
        for _ in 0..100 {
            if stats.queued == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            stats = queue.stats();
        }

        assert_eq!(stats, QueueStats { queued: 0, completed: 2, failed: 1 });
        assert_eq!(db.count_vectors().unwrap(), 2);
    }
}
