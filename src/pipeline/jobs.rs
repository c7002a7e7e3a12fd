//! Ingestion job registry and per-job progress tracking
//!
//! Each submitted file gets its own `JobProgress`, written only by that
//! file's ingestion task. Pollers never see the live record: every read goes
//! through `JobSnapshot`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Point-in-time copy of a job's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub file_name: String,
    pub state: JobState,
    pub total_frames: u64,
    pub processed_frames: u64,
    /// 0-100
    pub progress: f64,
    pub events_written: u64,
    pub append_failures: u64,
    pub malformed_frames: u64,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Outcome {
    state: JobState,
    error: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// Live progress record for one ingestion job
#[derive(Debug)]
pub struct JobProgress {
    id: JobId,
    file_name: String,
    submitted_at: DateTime<Utc>,
    total_frames: AtomicU64,
    processed_frames: AtomicU64,
    events_written: AtomicU64,
    append_failures: AtomicU64,
    malformed_frames: AtomicU64,
    /// Set when the process pass loop ends; progress reads 100 from then on
    pass_complete: AtomicBool,
    outcome: Mutex<Outcome>,
}

impl JobProgress {
    fn new(id: JobId, file_name: String) -> Self {
        Self {
            id,
            file_name,
            submitted_at: Utc::now(),
            total_frames: AtomicU64::new(0),
            processed_frames: AtomicU64::new(0),
            events_written: AtomicU64::new(0),
            append_failures: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            pass_complete: AtomicBool::new(false),
            outcome: Mutex::new(Outcome {
                state: JobState::Pending,
                error: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Count pass finished: reset progress to 0 and mark running
    pub fn start(&self, total_frames: u64) {
        self.total_frames.store(total_frames, Ordering::SeqCst);
        self.processed_frames.store(0, Ordering::SeqCst);
        self.pass_complete.store(false, Ordering::SeqCst);
        self.outcome().state = JobState::Running;
    }

    pub fn mark_running(&self) {
        self.outcome().state = JobState::Running;
    }

    pub fn record_frame(&self) {
        self.processed_frames.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_event_written(&self) {
        self.events_written.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_append_failure(&self) {
        self.append_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::SeqCst);
    }

    /// Process pass loop ended (whatever the commit outcome)
    pub fn complete_pass(&self) {
        self.pass_complete.store(true, Ordering::SeqCst);
    }

    pub fn succeed(&self) {
        let mut outcome = self.outcome();
        outcome.state = JobState::Succeeded;
        outcome.finished_at = Some(Utc::now());
    }

    pub fn fail(&self, error: impl std::fmt::Display) {
        let mut outcome = self.outcome();
        outcome.state = JobState::Failed;
        outcome.error = Some(error.to_string());
        outcome.finished_at = Some(Utc::now());
    }

    pub fn state(&self) -> JobState {
        self.outcome().state
    }

    /// processed/total*100, clamped; 100 once the process pass has ended
    pub fn progress_percent(&self) -> f64 {
        if self.pass_complete.load(Ordering::SeqCst) {
            return 100.0;
        }
        let total = self.total_frames.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let processed = self.processed_frames.load(Ordering::SeqCst);
        (processed as f64 / total as f64 * 100.0).min(100.0)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let outcome = self.outcome();
        JobSnapshot {
            id: self.id,
            file_name: self.file_name.clone(),
            state: outcome.state,
            total_frames: self.total_frames.load(Ordering::SeqCst),
            processed_frames: self.processed_frames.load(Ordering::SeqCst),
            progress: self.progress_percent(),
            events_written: self.events_written.load(Ordering::SeqCst),
            append_failures: self.append_failures.load(Ordering::SeqCst),
            malformed_frames: self.malformed_frames.load(Ordering::SeqCst),
            error: outcome.error.clone(),
            submitted_at: self.submitted_at,
            finished_at: outcome.finished_at,
        }
    }

    fn outcome(&self) -> std::sync::MutexGuard<'_, Outcome> {
        // Outcome is plain data; a panicked writer cannot leave it half-updated
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// All known jobs, keyed by id
#[derive(Debug)]
pub struct JobRegistry {
    next_id: AtomicU64,
    /// 0 until the first submission
    latest: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, Arc<JobProgress>>>,
    history_limit: usize,
}

impl JobRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            latest: AtomicU64::new(0),
            jobs: Mutex::new(BTreeMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Register a new pending job and make it the latest
    pub fn register(&self, file_name: impl Into<String>) -> Arc<JobProgress> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Arc::new(JobProgress::new(id, file_name.into()));

        let mut jobs = self.jobs();
        jobs.insert(id, job.clone());
        self.latest.store(id, Ordering::SeqCst);
        self.evict_finished(&mut jobs);

        job
    }

    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs().get(&id).map(|job| job.snapshot())
    }

    /// Most recently submitted job
    pub fn latest(&self) -> Option<JobSnapshot> {
        let id = self.latest.load(Ordering::SeqCst);
        if id == 0 {
            return None;
        }
        self.get(id)
    }

    /// Progress of the most recently submitted job, 0 if none
    pub fn progress(&self) -> f64 {
        self.latest().map(|job| job.progress).unwrap_or(0.0)
    }

    /// Snapshots of every retained job, oldest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.jobs().values().map(|job| job.snapshot()).collect()
    }

    /// Drop the oldest finished jobs beyond the history limit
    fn evict_finished(&self, jobs: &mut BTreeMap<JobId, Arc<JobProgress>>) {
        if jobs.len() <= self.history_limit {
            return;
        }
        let excess = jobs.len() - self.history_limit;
        let evict: Vec<JobId> = jobs
            .iter()
            .filter(|(_, job)| job.state().is_finished())
            .map(|(id, _)| *id)
            .take(excess)
            .collect();
        for id in evict {
            jobs.remove(&id);
            log::debug!("Evicted finished job {} from registry", id);
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<JobId, Arc<JobProgress>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(32)
    }
}
