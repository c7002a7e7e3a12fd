//! Query/control surface
//!
//! Typed operations an HTTP layer maps one-to-one onto routes:
//!
//! | Route | Operation |
//! |---|---|
//! | `POST /upload` | `submit_capture` |
//! | `GET /api/progress` | `progress` |
//! | `GET /api/jobs`, `GET /api/jobs/:id` | `jobs`, `job_status` |
//! | `GET /api/ips` | `distinct_ips` |
//! | `GET /api/protocols?ip=` | `protocols` |
//! | `GET /api/events?ip=&protocol=` | `events` / `events_page` |
//! | `GET /api/timeline?ip=&protocol=&view=` | `timeline` / `timeline_page` |
//!
//! Query parameters arrive as `Option<&str>`; blank counts as absent.

use crate::pipeline::timeline::{self, TimelinePoint, TimelineView};
use crate::pipeline::{
    EventFilter, EventStore, IngestionHandle, IngestionPipeline, JobId, JobRegistry, JobSnapshot,
    Page, PipelineConfig, StoreError, StoredEvent, ValidationError,
};
use crate::pipeline::types::non_blank;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    NotFound(String),
    Query(StoreError),
    Io(std::io::Error),
}

impl ApiError {
    /// HTTP status code for this error
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Query(_) | ApiError::Io(_) => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Query(err)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(err)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(e) => write!(f, "{}", e),
            ApiError::NotFound(what) => write!(f, "{} not found", what),
            ApiError::Query(e) => write!(f, "Query failed: {}", e),
            ApiError::Io(e) => write!(f, "Failed to store upload: {}", e),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Validation(e) => Some(e),
            ApiError::Query(e) => Some(e),
            ApiError::Io(e) => Some(e),
            ApiError::NotFound(_) => None,
        }
    }
}

/// `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `{"progress": 0-100}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub progress: f64,
}

/// Accepted upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: JobId,
    pub stored_path: PathBuf,
}

pub struct TimelineService {
    store: Arc<dyn EventStore>,
    pipeline: IngestionPipeline,
    upload_dir: PathBuf,
    upload_seq: AtomicU64,
}

impl TimelineService {
    pub fn new(store: Arc<dyn EventStore>, config: &PipelineConfig) -> Self {
        let registry = Arc::new(JobRegistry::new(config.job_history_limit));
        let pipeline = IngestionPipeline::new(store.clone(), registry, config);
        Self {
            store,
            pipeline,
            upload_dir: config.upload_dir.clone(),
            upload_seq: AtomicU64::new(0),
        }
    }

    /// Store uploaded bytes under the upload dir and start ingesting them
    ///
    /// Returns as soon as the job is registered; decode problems show up in
    /// the job's status, not here.
    pub async fn submit_capture(&self, file_name: &str, bytes: &[u8]) -> Result<Submission, ApiError> {
        let name = sanitize_file_name(file_name).ok_or(ValidationError::MissingArgument("file"))?;

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let seq = self.upload_seq.fetch_add(1, Ordering::SeqCst);
        let stored_path = self.upload_dir.join(format!(
            "{}-{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            seq,
            name
        ));
        tokio::fs::write(&stored_path, bytes).await?;
        log::info!("💾 Stored upload {} ({} bytes) at {}", file_name, bytes.len(), stored_path.display());

        let handle = self.pipeline.spawn(&stored_path);
        Ok(Submission {
            job_id: handle.job_id(),
            stored_path,
        })
    }

    /// Ingest a file already on disk, keeping the handle to await it
    pub fn ingest_path(&self, path: impl AsRef<Path>) -> IngestionHandle {
        self.pipeline.spawn(path.as_ref())
    }

    /// Progress of the most recently submitted job
    pub fn progress(&self) -> ProgressResponse {
        ProgressResponse {
            progress: self.pipeline.registry().progress(),
        }
    }

    pub fn job_status(&self, id: Option<&str>) -> Result<JobSnapshot, ApiError> {
        let raw = non_blank(id).ok_or(ValidationError::MissingArgument("id"))?;
        let id: JobId = raw.parse().map_err(|_| ValidationError::InvalidArgument {
            name: "id",
            value: raw.to_string(),
        })?;
        self.pipeline
            .registry()
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("Job {}", id)))
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.pipeline.registry().list()
    }

    pub async fn distinct_ips(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.store.distinct_source_ips().await?)
    }

    pub async fn protocols(&self, ip: Option<&str>) -> Result<Vec<String>, ApiError> {
        let ip = non_blank(ip).ok_or(ValidationError::MissingArgument("ip"))?;
        Ok(self.store.distinct_protocols(ip).await?)
    }

    pub async fn events(
        &self,
        ip: Option<&str>,
        protocol: Option<&str>,
    ) -> Result<Vec<StoredEvent>, ApiError> {
        self.events_page(ip, protocol, None, None).await
    }

    pub async fn events_page(
        &self,
        ip: Option<&str>,
        protocol: Option<&str>,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> Result<Vec<StoredEvent>, ApiError> {
        let filter = EventFilter::from_query(ip, protocol)?;
        let page = Page::from_query(limit, offset)?;
        Ok(self.store.raw_events(&filter, page).await?)
    }

    pub async fn timeline(
        &self,
        ip: Option<&str>,
        protocol: Option<&str>,
        view: Option<&str>,
    ) -> Result<Vec<TimelinePoint>, ApiError> {
        self.timeline_page(ip, protocol, view, None, None).await
    }

    pub async fn timeline_page(
        &self,
        ip: Option<&str>,
        protocol: Option<&str>,
        view: Option<&str>,
        limit: Option<&str>,
        offset: Option<&str>,
    ) -> Result<Vec<TimelinePoint>, ApiError> {
        let filter = EventFilter::from_query(ip, protocol)?;
        let view = TimelineView::parse(view)?;
        let page = Page::from_query(limit, offset)?;
        Ok(timeline::timeline(self.store.as_ref(), &filter, view, page).await?)
    }
}

/// Last path component with anything outside `[A-Za-z0-9._-]` replaced
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = Path::new(name.trim()).file_name()?.to_string_lossy().into_owned();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
