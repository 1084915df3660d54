//! The distributed repository lock (`spec.md` §4.4).
//!
//! A database-backed mutex bound to `(owner, name)`, tolerant of process
//! crashes: a holder that dies without releasing simply lets its row expire,
//! and any other worker may then reclaim it.

use chrono::{NaiveDateTime, Utc};
use history_core::LockConfig;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::error::DbResult;
use crate::models::RepositoryLockRow;

/// Generates a per-process holder identifier (`spec.md` §3: "a per-process
/// random identifier generated at startup").
#[must_use]
pub fn generate_holder_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Attempts to acquire the lock for `(owner, name)`.
///
/// Bounded to two attempts total: if the first insert loses a unique-key
/// race, the existing row is read; if it is expired, it is deleted under a
/// conditional that re-checks expiry (closing the lost-release race) and
/// acquisition is retried exactly once (`spec.md` §4.4).
#[instrument(skip(pool, config), fields(owner, name))]
pub async fn acquire(
    pool: &SqlitePool,
    owner: &str,
    name: &str,
    holder_id: &str,
    config: &LockConfig,
) -> DbResult<bool> {
    for attempt in 0..2 {
        if try_insert(pool, owner, name, holder_id, config).await? {
            return Ok(true);
        }

        let deleted = sqlx::query(
            "DELETE FROM repository_locks WHERE owner = ?1 AND name = ?2 AND expires_at <= ?3",
        )
        .bind(owner)
        .bind(name)
        .bind(now())
        .execute(pool)
        .await?
        .rows_affected();

        if deleted == 0 {
            // The row is held and not expired: acquisition genuinely fails.
            return Ok(false);
        }
        if attempt == 0 {
            warn!(owner, name, "reclaimed expired lock, retrying acquisition");
        }
    }
    Ok(false)
}

async fn try_insert(
    pool: &SqlitePool,
    owner: &str,
    name: &str,
    holder_id: &str,
    config: &LockConfig,
) -> DbResult<bool> {
    let now = now();
    let expires_at = now + chrono::Duration::from_std(config.lock_timeout()).unwrap_or_default();

    let result = sqlx::query(
        r"
        INSERT INTO repository_locks (owner, name, locked_at, last_heartbeat_at, expires_at, lock_holder_id)
        VALUES (?1, ?2, ?3, ?3, ?4, ?5)
        ON CONFLICT(owner, name) DO NOTHING
        ",
    )
    .bind(owner)
    .bind(name)
    .bind(now)
    .bind(expires_at)
    .bind(holder_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Releases the lock, but only if `holder_id` still matches — a stale
/// holder (e.g. one that already lost the lock to expiry-reclamation)
/// cannot release someone else's row.
#[instrument(skip(pool), fields(owner, name))]
pub async fn release(pool: &SqlitePool, owner: &str, name: &str, holder_id: &str) -> DbResult<bool> {
    let result = sqlx::query(
        "DELETE FROM repository_locks WHERE owner = ?1 AND name = ?2 AND lock_holder_id = ?3",
    )
    .bind(owner)
    .bind(name)
    .bind(holder_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Updates `last_heartbeat_at`/`expires_at` if `holder_id` still matches.
/// Returns `false` when another holder has taken over — the caller's
/// heartbeat timer must stop.
#[instrument(skip(pool, config), fields(owner, name))]
pub async fn refresh(
    pool: &SqlitePool,
    owner: &str,
    name: &str,
    holder_id: &str,
    config: &LockConfig,
) -> DbResult<bool> {
    let now = now();
    let expires_at = now + chrono::Duration::from_std(config.lock_timeout()).unwrap_or_default();

    let result = sqlx::query(
        r"
        UPDATE repository_locks
        SET last_heartbeat_at = ?1, expires_at = ?2
        WHERE owner = ?3 AND name = ?4 AND lock_holder_id = ?5
        ",
    )
    .bind(now)
    .bind(expires_at)
    .bind(owner)
    .bind(name)
    .bind(holder_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Reads the current lock row for `(owner, name)`, if any — expired or not.
/// Used for diagnostics and by tests asserting the §8 "at most one
/// non-expired lock row per repository" invariant; callers deciding whether
/// the lock is actually held should go through [`acquire`] instead, since
/// that is the only path that treats expiry as "not held".
#[instrument(skip(pool), fields(owner, name))]
pub async fn get(pool: &SqlitePool, owner: &str, name: &str) -> DbResult<Option<RepositoryLockRow>> {
    let row = sqlx::query_as::<_, RepositoryLockRow>(
        "SELECT owner, name, locked_at, last_heartbeat_at, expires_at, lock_holder_id
         FROM repository_locks WHERE owner = ?1 AND name = ?2",
    )
    .bind(owner)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Deletes every lock row whose `expires_at` has passed. Callable inline
/// before acquisition (see [`acquire`]) or on a timer by a janitor task.
#[instrument(skip(pool))]
pub async fn sweep_expired(pool: &SqlitePool) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM repository_locks WHERE expires_at <= ?1")
        .bind(now())
        .execute(pool)
        .await?;
    let n = result.rows_affected();
    if n > 0 {
        info!(count = n, "swept expired repository locks");
    }
    Ok(n)
}

/// A held lock plus its background heartbeat task.
///
/// Dropping the handle without calling [`LockHandle::release`] stops the
/// heartbeat but leaves the row in place — it will simply expire, which is
/// the crash-safety property the whole design exists for.
pub struct LockHandle {
    pool: SqlitePool,
    owner: String,
    name: String,
    holder_id: String,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

impl LockHandle {
    /// Acquires the lock and starts the recurring heartbeat timer.
    /// Returns `Ok(None)` if the lock is held by someone else.
    pub async fn acquire(
        pool: SqlitePool,
        owner: &str,
        name: &str,
        holder_id: String,
        config: LockConfig,
    ) -> DbResult<Option<Self>> {
        if !acquire(&pool, owner, name, &holder_id, &config).await? {
            return Ok(None);
        }

        let heartbeat = {
            let pool = pool.clone();
            let owner = owner.to_string();
            let name = name.to_string();
            let holder_id = holder_id.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.heartbeat_interval());
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    match refresh(&pool, &owner, &name, &holder_id, &config).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(owner, name, "lock heartbeat lost ownership, stopping");
                            break;
                        }
                        Err(e) => {
                            warn!(owner, name, error = %e, "lock heartbeat failed");
                            break;
                        }
                    }
                }
            })
        };

        Ok(Some(Self {
            pool,
            owner: owner.to_string(),
            name: name.to_string(),
            holder_id,
            heartbeat: Some(heartbeat),
        }))
    }

    /// Stops the heartbeat and deletes the lock row. Always stops the timer
    /// first (`spec.md` §4.4).
    pub async fn release(mut self) -> DbResult<bool> {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        release(&self.pool, &self.owner, &self.name, &self.holder_id).await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::apply_schema;

    async fn fresh_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn acquire_then_competing_acquire_fails() {
        let pool = fresh_pool().await;
        let config = LockConfig::default();
        assert!(acquire(&pool, "rust-lang", "rust", "holder-a", &config).await.unwrap());
        assert!(!acquire(&pool, "rust-lang", "rust", "holder-b", &config).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_holder() {
        let pool = fresh_pool().await;
        let config = LockConfig::default();
        acquire(&pool, "rust-lang", "rust", "holder-a", &config).await.unwrap();
        assert!(!release(&pool, "rust-lang", "rust", "holder-b").await.unwrap());
        assert!(release(&pool, "rust-lang", "rust", "holder-a").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let pool = fresh_pool().await;
        let mut expired_config = LockConfig::default();
        expired_config.lock_timeout_ms = 0;
        acquire(&pool, "rust-lang", "rust", "holder-a", &expired_config).await.unwrap();

        // expires_at == locked_at with a zero timeout, so it is already
        // expired by the time the second attempt runs.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let config = LockConfig::default();
        assert!(acquire(&pool, "rust-lang", "rust", "holder-b", &config).await.unwrap());
    }

    #[tokio::test]
    async fn refresh_fails_for_wrong_holder() {
        let pool = fresh_pool().await;
        let config = LockConfig::default();
        acquire(&pool, "rust-lang", "rust", "holder-a", &config).await.unwrap();
        assert!(!refresh(&pool, "rust-lang", "rust", "holder-b", &config).await.unwrap());
        assert!(refresh(&pool, "rust-lang", "rust", "holder-a", &config).await.unwrap());
    }

    #[tokio::test]
    async fn get_reflects_the_current_holder() {
        let pool = fresh_pool().await;
        let config = LockConfig::default();
        assert!(get(&pool, "rust-lang", "rust").await.unwrap().is_none());

        acquire(&pool, "rust-lang", "rust", "holder-a", &config).await.unwrap();
        let row = get(&pool, "rust-lang", "rust").await.unwrap().unwrap();
        assert_eq!(row.lock_holder_id, "holder-a");
        assert_eq!(row.owner, "rust-lang");
        assert_eq!(row.name, "rust");
    }

    #[tokio::test]
    async fn sweep_expired_counts_only_expired_rows() {
        let pool = fresh_pool().await;
        let mut expired_config = LockConfig::default();
        expired_config.lock_timeout_ms = 0;
        acquire(&pool, "a", "b", "holder-a", &expired_config).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let config = LockConfig::default();
        acquire(&pool, "c", "d", "holder-b", &config).await.unwrap();

        let swept = sweep_expired(&pool).await.unwrap();
        assert_eq!(swept, 1);
    }
}
