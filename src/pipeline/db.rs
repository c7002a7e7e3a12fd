//! Event store: durable append-only event log
//!
//! Writes: one `EventBatch` per ingested file, holding a single transaction
//! on a dedicated connection. Reads: a shared query connection. WAL mode lets
//! the two run side by side.
//!
//! Schema: `sql/01_events.sql` (embedded, idempotent).

use super::types::{
    format_timestamp, parse_timestamp, Event, EventFilter, MinuteBucket, Page, StoredEvent,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ToSql};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/01_events.sql");

/// Default wait for the write lock when another file is mid-commit
pub const DEFAULT_WRITER_BUSY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub enum StoreError {
    /// Database unreachable: cannot open, cannot configure, lock poisoned
    Connectivity(String),
    Query(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Query(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connectivity(msg) => write!(f, "Database connectivity error: {}", msg),
            StoreError::Query(e) => write!(f, "Database query error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Query(e) => Some(e),
            StoreError::Connectivity(_) => None,
        }
    }
}

/// Open write transaction scoped to one capture file
pub trait EventBatch: Send {
    /// Insert one event inside the open transaction, returning its id
    fn append(&mut self, event: &Event) -> Result<i64, StoreError>;

    /// Commit the transaction, returning the number of rows appended
    ///
    /// Dropping a batch without committing rolls it back.
    fn commit(self: Box<Self>) -> Result<u64, StoreError>;
}

/// Persistence boundary consumed by the ingestion pipeline and the query API
///
/// Table: `events(id, ip, protocol, timestamp)`, see `sql/01_events.sql`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Create the event log if absent (safe on every startup)
    fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Begin the per-file write transaction
    ///
    /// Blocking; call from a blocking context.
    fn begin_batch(&self) -> Result<Box<dyn EventBatch>, StoreError>;

    /// All source addresses seen, order unspecified
    async fn distinct_source_ips(&self) -> Result<Vec<String>, StoreError>;

    /// All protocols seen for one address
    async fn distinct_protocols(&self, ip: &str) -> Result<Vec<String>, StoreError>;

    /// Matching events ordered by (timestamp, id) ascending
    async fn raw_events(
        &self,
        filter: &EventFilter,
        page: Option<Page>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Per-minute counts, grouped and counted in SQL, ascending by minute
    async fn summarized_timeline(&self, filter: &EventFilter)
        -> Result<Vec<MinuteBucket>, StoreError>;

    /// Matching timestamps ordered by (timestamp, id) ascending, one per event
    async fn complete_timeline(
        &self,
        filter: &EventFilter,
        page: Option<Page>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Number of matching events
    async fn event_count(&self, filter: &EventFilter) -> Result<u64, StoreError>;
}

/// SQLite implementation of EventStore
pub struct SqliteEventStore {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    writer_busy_timeout: Duration,
}

impl SqliteEventStore {
    /// Open (creating if needed) the database and verify it answers
    ///
    /// Any failure here is a connectivity error: the process should not
    /// continue without a reachable store.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connectivity(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = open_connection(&db_path)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StoreError::Connectivity(format!("Ping failed: {}", e)))?;

        log::info!("✅ Event store opened: {}", db_path.display());

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
            writer_busy_timeout: DEFAULT_WRITER_BUSY_TIMEOUT,
        })
    }

    /// How long a batch waits for another file's transaction to finish
    pub fn with_writer_busy_timeout(mut self, timeout: Duration) -> Self {
        self.writer_busy_timeout = timeout;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connectivity("query connection lock poisoned".to_string()))
    }
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path).map_err(|e| {
        StoreError::Connectivity(format!("Failed to open {}: {}", db_path.display(), e))
    })?;
    apply_optimized_pragmas(&conn)
        .map_err(|e| StoreError::Connectivity(format!("Failed to apply pragmas: {}", e)))?;
    Ok(conn)
}

/// `WHERE` clause plus positional parameters for a filter
fn filter_clause(filter: &EventFilter) -> (&'static str, Vec<&dyn ToSql>) {
    match &filter.protocol {
        Some(protocol) => (
            "WHERE ip = ? AND protocol = ?",
            vec![&filter.ip as &dyn ToSql, protocol as &dyn ToSql],
        ),
        None => ("WHERE ip = ?", vec![&filter.ip as &dyn ToSql]),
    }
}

fn timestamp_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[async_trait]
impl EventStore for SqliteEventStore {
    fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        log::info!("✅ Event log schema ready");
        Ok(())
    }

    fn begin_batch(&self) -> Result<Box<dyn EventBatch>, StoreError> {
        let conn = open_connection(&self.db_path)?;
        conn.busy_timeout(self.writer_busy_timeout)?;
        // Take the write lock up front; a concurrent file waits here
        conn.execute_batch("BEGIN IMMEDIATE")?;

        Ok(Box::new(SqliteEventBatch {
            conn,
            appended: 0,
            finished: false,
        }))
    }

    async fn distinct_source_ips(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT DISTINCT ip FROM events")?;
        let ips = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ips)
    }

    async fn distinct_protocols(&self, ip: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT DISTINCT protocol FROM events WHERE ip = ?1")?;
        let protocols = stmt
            .query_map([ip], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(protocols)
    }

    async fn raw_events(
        &self,
        filter: &EventFilter,
        page: Option<Page>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        // LIMIT -1 is unbounded in SQLite
        let (limit, offset) = page.map(|p| (p.limit as i64, p.offset as i64)).unwrap_or((-1, 0));
        let (clause, mut params) = filter_clause(filter);
        params.push(&limit);
        params.push(&offset);

        let sql = format!(
            "SELECT id, ip, protocol, timestamp FROM events {} \
             ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?",
            clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let events = stmt
            .query_map(params.as_slice(), |row| {
                Ok(StoredEvent {
                    id: row.get(0)?,
                    ip: row.get(1)?,
                    protocol: row.get(2)?,
                    timestamp: timestamp_column(row, 3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    async fn summarized_timeline(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<MinuteBucket>, StoreError> {
        let (clause, params) = filter_clause(filter);
        let sql = format!(
            "SELECT strftime('%Y-%m-%d %H:%M', timestamp) AS minute, COUNT(*) AS count \
             FROM events {} GROUP BY minute ORDER BY minute ASC",
            clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let buckets = stmt
            .query_map(params.as_slice(), |row| {
                Ok(MinuteBucket {
                    minute: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(buckets)
    }

    async fn complete_timeline(
        &self,
        filter: &EventFilter,
        page: Option<Page>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        // LIMIT -1 is unbounded in SQLite
        let (limit, offset) = page.map(|p| (p.limit as i64, p.offset as i64)).unwrap_or((-1, 0));
        let (clause, mut params) = filter_clause(filter);
        params.push(&limit);
        params.push(&offset);

        let sql = format!(
            "SELECT timestamp FROM events {} ORDER BY timestamp ASC, id ASC LIMIT ? OFFSET ?",
            clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let timestamps = stmt
            .query_map(params.as_slice(), |row| timestamp_column(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(timestamps)
    }

    async fn event_count(&self, filter: &EventFilter) -> Result<u64, StoreError> {
        let (clause, params) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM events {}", clause);

        let conn = self.conn()?;
        let count: i64 = conn.query_row(&sql, params.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// One file's write transaction on its own connection
struct SqliteEventBatch {
    conn: Connection,
    appended: u64,
    finished: bool,
}

impl EventBatch for SqliteEventBatch {
    fn append(&mut self, event: &Event) -> Result<i64, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO events (ip, protocol, timestamp) VALUES (?1, ?2, ?3)")?;
        stmt.execute(params![
            event.source_ip,
            event.protocol,
            format_timestamp(&event.timestamp),
        ])?;
        self.appended += 1;
        Ok(self.conn.last_insert_rowid())
    }

    fn commit(mut self: Box<Self>) -> Result<u64, StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        log::debug!("✅ Committed {} events", self.appended);
        Ok(self.appended)
    }
}

impl Drop for SqliteEventBatch {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                log::warn!("⚠️  Rollback of uncommitted batch failed: {}", e);
            }
        }
    }
}
