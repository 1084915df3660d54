//! Snapshot Store and repository identity queries (`spec.md` §3, §6).
//!
//! These functions are the "DB truth" for the rest of the engine: the
//! history service never writes SQL directly, only calls through here.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use history_core::{Repository, RepositoryInfo, Snapshot};
use sqlx::SqlitePool;

use crate::error::DbResult;
use crate::models::{RepositoryRow, SnapshotRow};

/// Inserts a repository row if absent, or returns the existing one unchanged.
///
/// Repository identity (`owner`, `name`, `created_at`) never needs repair
/// once written — only `last_synced_at` moves, via [`touch_last_synced`].
pub async fn upsert_repository(
    pool: &SqlitePool,
    owner: &str,
    name: &str,
    info: &RepositoryInfo,
) -> DbResult<Repository> {
    let row: RepositoryRow = sqlx::query_as(
        r"
        INSERT INTO repositories (owner, name, created_at, last_synced_at)
        VALUES (?1, ?2, ?3, NULL)
        ON CONFLICT(owner, name) DO UPDATE SET owner = excluded.owner
        RETURNING id, owner, name, created_at, last_synced_at
        ",
    )
    .bind(owner)
    .bind(name)
    .bind(info.created_at)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Looks up a repository by its case-sensitive `(owner, name)` pair as
/// stored (callers are expected to have already resolved canonical casing).
pub async fn get_repository(pool: &SqlitePool, owner: &str, name: &str) -> DbResult<Option<Repository>> {
    let row: Option<RepositoryRow> = sqlx::query_as(
        "SELECT id, owner, name, created_at, last_synced_at FROM repositories WHERE owner = ?1 AND name = ?2",
    )
    .bind(owner)
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Records that a refresh just completed for this repository.
pub async fn touch_last_synced(pool: &SqlitePool, repository_id: i64, at: NaiveDateTime) -> DbResult<()> {
    sqlx::query("UPDATE repositories SET last_synced_at = ?1 WHERE id = ?2")
        .bind(at)
        .bind(repository_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Inserts or repairs a single snapshot for `(repository_id, snapshot_date)`.
pub async fn upsert_snapshot(pool: &SqlitePool, snapshot: &Snapshot) -> DbResult<()> {
    let c = &snapshot.counts;
    sqlx::query(
        r"
        INSERT INTO snapshots (
            repository_id, snapshot_date,
            issues_created_before, issues_closed_before,
            prs_created_before, prs_closed_before, prs_merged_before
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(repository_id, snapshot_date) DO UPDATE SET
            issues_created_before = excluded.issues_created_before,
            issues_closed_before = excluded.issues_closed_before,
            prs_created_before = excluded.prs_created_before,
            prs_closed_before = excluded.prs_closed_before,
            prs_merged_before = excluded.prs_merged_before
        ",
    )
    .bind(snapshot.repository_id)
    .bind(snapshot.snapshot_date)
    .bind(c.issues_created_before as i64)
    .bind(c.issues_closed_before as i64)
    .bind(c.prs_created_before as i64)
    .bind(c.prs_closed_before as i64)
    .bind(c.prs_merged_before as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upserts a batch of snapshots in one transaction — the write side of a
/// completed fetcher run (`spec.md` §4.3: "cache writes happen only after
/// the full fetch succeeds").
pub async fn upsert_snapshots(pool: &SqlitePool, snapshots: &[Snapshot]) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    for snapshot in snapshots {
        let c = &snapshot.counts;
        sqlx::query(
            r"
            INSERT INTO snapshots (
                repository_id, snapshot_date,
                issues_created_before, issues_closed_before,
                prs_created_before, prs_closed_before, prs_merged_before
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(repository_id, snapshot_date) DO UPDATE SET
                issues_created_before = excluded.issues_created_before,
                issues_closed_before = excluded.issues_closed_before,
                prs_created_before = excluded.prs_created_before,
                prs_closed_before = excluded.prs_closed_before,
                prs_merged_before = excluded.prs_merged_before
            ",
        )
        .bind(snapshot.repository_id)
        .bind(snapshot.snapshot_date)
        .bind(c.issues_created_before as i64)
        .bind(c.issues_closed_before as i64)
        .bind(c.prs_created_before as i64)
        .bind(c.prs_closed_before as i64)
        .bind(c.prs_merged_before as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// All snapshots for a repository, ordered ascending by date.
pub async fn list_snapshots(pool: &SqlitePool, repository_id: i64) -> DbResult<Vec<Snapshot>> {
    let rows: Vec<SnapshotRow> = sqlx::query_as(
        r"
        SELECT repository_id, snapshot_date,
               issues_created_before, issues_closed_before,
               prs_created_before, prs_closed_before, prs_merged_before
        FROM snapshots
        WHERE repository_id = ?1
        ORDER BY snapshot_date ASC
        ",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// A single known-date lookup, used by the fetcher to avoid re-probing a
/// date already persisted.
pub async fn get_snapshot(pool: &SqlitePool, repository_id: i64, date: NaiveDate) -> DbResult<Option<Snapshot>> {
    let row: Option<SnapshotRow> = sqlx::query_as(
        r"
        SELECT repository_id, snapshot_date,
               issues_created_before, issues_closed_before,
               prs_created_before, prs_closed_before, prs_merged_before
        FROM snapshots
        WHERE repository_id = ?1 AND snapshot_date = ?2
        ",
    )
    .bind(repository_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Adjacent snapshot pairs whose date gap exceeds `max_gap_days`.
///
/// A read-only consistency audit over persisted data, in the spirit of the
/// teacher's integrity-check helpers: useful for operators confirming the
/// fetcher actually converged rather than leaving coarse segments behind.
pub async fn coverage_gaps(
    pool: &SqlitePool,
    repository_id: i64,
    max_gap_days: i64,
) -> DbResult<Vec<(NaiveDate, NaiveDate, i64)>> {
    let snapshots = list_snapshots(pool, repository_id).await?;
    let mut gaps = Vec::new();
    for pair in snapshots.windows(2) {
        let (a, b) = (pair[0].snapshot_date, pair[1].snapshot_date);
        let delta = (b - a).num_days();
        if delta > max_gap_days {
            gaps.push((a, b, delta));
        }
    }
    Ok(gaps)
}

/// Returns `Utc::now()` floored to the precision the `last_synced_at` and
/// lock-timestamp columns store at (seconds). Kept as the one helper that
/// reads the wall clock on the database side of the engine.
#[must_use]
pub fn now_naive() -> NaiveDateTime {
    Utc::now().naive_utc()
}
