//! # Capture Ingestion Pipeline
//!
//! Turns capture files into a durable event log and serves timeline views
//! over it.
//!
//! ## Architecture
//!
//! 1. A file is submitted and registered as a job (`pending`)
//! 2. The job waits for a concurrency permit, then counts frames (pass 1)
//! 3. Pass 2 re-decodes the file and appends one event per frame that has a
//!    network layer, all inside one transaction
//! 4. The transaction commits; the job ends `succeeded` or `failed`
//!
//! Progress is tracked per job. Pollers read snapshots from the registry,
//! never the live counters.
//!
//! ## Schema Reference
//!
//! `sql/01_events.sql`: `events(id, ip, protocol, timestamp)`
//!
//! ## Module Organization
//!
//! - `types` - Event, StoredEvent, EventFilter, Page, ValidationError
//! - `jobs` - Job registry and per-job progress
//! - `ingestion` - Two-pass file processor
//! - `db` - Event store trait and SQLite implementation
//! - `timeline` - Summarized / complete timeline views
//! - `config` - Environment configuration

pub mod config;
pub mod db;
pub mod ingestion;
pub mod jobs;
pub mod timeline;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig};
pub use db::{EventBatch, EventStore, SqliteEventStore, StoreError};
pub use ingestion::{IngestError, IngestionHandle, IngestionPipeline};
pub use jobs::{JobId, JobRegistry, JobSnapshot, JobState};
pub use timeline::{TimelinePoint, TimelineView};
pub use types::{Event, EventFilter, MinuteBucket, Page, StoredEvent, ValidationError};
