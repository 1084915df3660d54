//! Database schema creation.
//!
//! Three tables, per `spec.md` §6: `repositories`, `snapshots`,
//! `repository_locks`. Dates are stored as ISO-8601 day strings, timestamps
//! as RFC3339 — `sqlx`'s `chrono` feature binds `NaiveDate`/`NaiveDateTime`
//! to these columns directly.

/// SQL statements for creating the database schema.
pub const CREATE_TABLES_SQL: &str = r"
-- Repository identity: a case-insensitive (owner, name) pair.
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_synced_at TEXT,
    UNIQUE(owner, name)
);
CREATE INDEX IF NOT EXISTS idx_repositories_owner_name ON repositories(owner, name);

-- Per-date count tuples. Append-only in intent; upserts exist only to
-- repair a value for the same date.
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    snapshot_date TEXT NOT NULL,
    issues_created_before INTEGER NOT NULL,
    issues_closed_before INTEGER NOT NULL,
    prs_created_before INTEGER NOT NULL,
    prs_closed_before INTEGER NOT NULL,
    prs_merged_before INTEGER NOT NULL,
    UNIQUE(repository_id, snapshot_date)
);
CREATE INDEX IF NOT EXISTS idx_snapshots_repo_date ON snapshots(repository_id, snapshot_date);

-- Cross-process mutual exclusion, one row per repository while a refresh
-- is in flight.
CREATE TABLE IF NOT EXISTS repository_locks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    locked_at TEXT NOT NULL,
    last_heartbeat_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    lock_holder_id TEXT NOT NULL,
    UNIQUE(owner, name)
);
CREATE INDEX IF NOT EXISTS idx_repository_locks_expires_at ON repository_locks(expires_at);
";

use crate::error::DbResult;

/// Applies the schema to `pool`. Idempotent — safe to call on every
/// startup.
pub async fn apply_schema(pool: &sqlx::SqlitePool) -> DbResult<()> {
    sqlx::raw_sql(CREATE_TABLES_SQL).execute(pool).await?;
    Ok(())
}
