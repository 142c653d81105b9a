//! DuckDB persistence layer for Quill's offline write pipeline.
//!
//! Two stores live here:
//! - [`QueueStore`] — the durable operation queue, its dead-letter table, and
//!   the processed-key ledger that backs the idempotency guarantee.
//! - [`VersionStore`] — the append-only authoritative record of entity
//!   versions and content hashes.
//!
//! Both wrap an `Arc<Mutex<Connection>>` so they are cheap to clone and safe
//! to share across tasks. Concurrent drains coordinate through the queue
//! table's claim transition, never through in-memory locks.

mod error;
mod queue_store;
mod version_store;

pub use error::{StorageError, StorageResult};
pub use queue_store::{EnqueueOutcome, QueueStore};
pub use version_store::{VersionComparison, VersionRecord, VersionStore};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once. This handles the common case
/// where an unclean shutdown leaves a WAL file that prevents reopening.
///
/// `memory_limit` and `threads` cap per-database resource usage (DuckDB
/// defaults to most of system RAM and all cores, far too aggressive when the
/// queue and version databases are open side by side).
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
