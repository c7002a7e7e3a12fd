//! Pipeline ingestion - two-pass capture file processor
//!
//! One background task per submitted file:
//! 1. Count pass: decode the whole file, `total_frames` = frames yielded
//! 2. Process pass: re-decode, extract events, append them to one batch
//! 3. Commit the batch; the job ends `succeeded` or `failed`
//!
//! Jobs wait for a semaphore permit before starting, so at most
//! `max_concurrent_jobs` files are decoded at once.

use super::config::PipelineConfig;
use super::db::{EventStore, StoreError};
use super::jobs::{JobId, JobProgress, JobRegistry, JobSnapshot};
use crate::capture::{extract_event, CaptureSource, DecodeError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug)]
pub enum IngestError {
    Decode(DecodeError),
    Store(StoreError),
}

impl From<DecodeError> for IngestError {
    fn from(err: DecodeError) -> Self {
        IngestError::Decode(err)
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Decode(e) => write!(f, "{}", e),
            IngestError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Decode(e) => Some(e),
            IngestError::Store(e) => Some(e),
        }
    }
}

/// Handle to a spawned ingestion job
///
/// Dropping it does not cancel the job.
#[derive(Debug)]
pub struct IngestionHandle {
    job_id: JobId,
    task: JoinHandle<JobSnapshot>,
}

impl IngestionHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the job to finish and return its final snapshot
    pub async fn wait(self) -> Result<JobSnapshot, JoinError> {
        self.task.await
    }
}

/// Spawns and tracks ingestion jobs against one event store
pub struct IngestionPipeline {
    store: Arc<dyn EventStore>,
    registry: Arc<JobRegistry>,
    permits: Arc<Semaphore>,
    decoder_buffer_bytes: usize,
    progress_log_every: u64,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<JobRegistry>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            decoder_buffer_bytes: config.decoder_buffer_bytes,
            progress_log_every: config.progress_log_every.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Register a job for `path` and start it in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, path: impl Into<PathBuf>) -> IngestionHandle {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let job = self.registry.register(file_name);
        let job_id = job.id();
        log::info!("📥 Job {} submitted: {}", job_id, path.display());

        let store = self.store.clone();
        let permits = self.permits.clone();
        let buffer_bytes = self.decoder_buffer_bytes;
        let log_every = self.progress_log_every;

        let task = tokio::spawn(async move {
            run_job(store, job, permits, path, buffer_bytes, log_every).await
        });

        IngestionHandle { job_id, task }
    }
}

async fn run_job(
    store: Arc<dyn EventStore>,
    job: Arc<JobProgress>,
    permits: Arc<Semaphore>,
    path: PathBuf,
    buffer_bytes: usize,
    log_every: u64,
) -> JobSnapshot {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            job.fail("ingestion pipeline closed");
            return job.snapshot();
        }
    };
    job.mark_running();

    let worker_job = job.clone();
    let result = tokio::task::spawn_blocking(move || {
        ingest_file(store.as_ref(), &worker_job, &path, buffer_bytes, log_every)
    })
    .await;

    match result {
        Ok(Ok(written)) => {
            job.succeed();
            let snapshot = job.snapshot();
            log::info!("✅ Job {} complete: {}", snapshot.id, snapshot.file_name);
            log::info!("   ├─ Frames: {}", snapshot.processed_frames);
            log::info!("   ├─ Events written: {}", written);
            log::info!("   ├─ Append failures: {}", snapshot.append_failures);
            log::info!("   └─ Malformed frames: {}", snapshot.malformed_frames);
            snapshot
        }
        Ok(Err(e)) => {
            log::error!("❌ Job {} failed: {}", job.id(), e);
            job.fail(e);
            job.snapshot()
        }
        Err(e) => {
            log::error!("❌ Job {} worker panicked: {}", job.id(), e);
            job.fail(format!("ingestion worker panicked: {}", e));
            job.snapshot()
        }
    }
}

/// Run both passes over one capture file, returning the committed event count
///
/// Blocking: decoding and SQLite writes are synchronous.
pub fn ingest_file(
    store: &dyn EventStore,
    job: &JobProgress,
    path: &Path,
    buffer_bytes: usize,
    log_every: u64,
) -> Result<u64, IngestError> {
    let source = CaptureSource::with_buffer(path, buffer_bytes)?;

    let total = source.count_frames()?;
    job.start(total);
    log::info!("🔍 Job {}: {} frames in {}", job.id(), total, path.display());

    let mut batch = store.begin_batch()?;
    let frames = source.frames()?;

    let started = Instant::now();
    let mut processed = 0u64;
    let mut pass_error = None;

    for frame in frames {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                pass_error = Some(e);
                break;
            }
        };

        if frame.malformed {
            job.record_malformed();
        }

        if let Some(event) = extract_event(&frame) {
            match batch.append(&event) {
                Ok(_) => job.record_event_written(),
                Err(e) => {
                    log::warn!(
                        "⚠️  Job {}: skipped event from frame {}: {}",
                        job.id(),
                        frame.index,
                        e
                    );
                    job.record_append_failure();
                }
            }
        }

        job.record_frame();
        processed += 1;

        if processed % log_every == 0 {
            let rate = processed as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
            log::info!(
                "📊 Job {}: {}/{} frames ({:.1}%) | {:.0} frames/sec",
                job.id(),
                processed,
                total,
                job.progress_percent(),
                rate
            );
        }
    }

    let committed = batch.commit();
    job.complete_pass();

    if let Some(e) = pass_error {
        if let Err(commit_err) = &committed {
            log::error!("❌ Job {}: commit after decode error also failed: {}", job.id(), commit_err);
        }
        return Err(e.into());
    }

    Ok(committed?)
}
