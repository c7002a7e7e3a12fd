//! SQLite connection tuning shared by every connection the crate opens
//!
//! The ingestion task writes on its own connection while query connections
//! read concurrently, so WAL mode is required.

use rusqlite::Connection;
use std::time::Duration;

/// Pages between automatic WAL checkpoints
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply optimized PRAGMAs (WAL, NORMAL, MEMORY, autocheckpoint, busy timeout)
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    // journal_mode returns a row, pragma_update handles that
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
