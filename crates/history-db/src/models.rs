//! Row structs mapping the three persisted tables to `history-core`'s
//! shared model types.

use chrono::{NaiveDate, NaiveDateTime};
use history_core::{CountTuple, Repository, Snapshot};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepositoryRow {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub created_at: NaiveDate,
    pub last_synced_at: Option<NaiveDateTime>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Self {
            id: row.id,
            owner: row.owner,
            name: row.name,
            created_at: row.created_at,
            last_synced_at: row.last_synced_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub repository_id: i64,
    pub snapshot_date: NaiveDate,
    pub issues_created_before: i64,
    pub issues_closed_before: i64,
    pub prs_created_before: i64,
    pub prs_closed_before: i64,
    pub prs_merged_before: i64,
}

impl From<SnapshotRow> for Snapshot {
    fn from(row: SnapshotRow) -> Self {
        // Counts are non-negative by construction (they are upstream totals);
        // SQLite has no native unsigned column type, so the widening back to
        // `u64` is a plain cast rather than a fallible conversion.
        Self {
            repository_id: row.repository_id,
            snapshot_date: row.snapshot_date,
            counts: CountTuple {
                issues_created_before: row.issues_created_before as u64,
                issues_closed_before: row.issues_closed_before as u64,
                prs_created_before: row.prs_created_before as u64,
                prs_closed_before: row.prs_closed_before as u64,
                prs_merged_before: row.prs_merged_before as u64,
            },
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepositoryLockRow {
    pub owner: String,
    pub name: String,
    pub locked_at: NaiveDateTime,
    pub last_heartbeat_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub lock_holder_id: String,
}
