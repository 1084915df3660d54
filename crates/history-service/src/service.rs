//! The History Service facade (`spec.md` §4.3).
//!
//! The single entry point external collaborators use: [`HistoryService::get_timeline`]
//! composes cache lookup, incremental refresh, distributed lock acquisition,
//! and in-process single-flight coalescing into one call.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use history_core::{
    Error, FetcherConfig, HistoryServiceConfig, LockConfig, RepositoryRef, Result, Snapshot, today_utc,
};
use history_db::lock::LockHandle;
use history_db::{generate_holder_id, queries};
use history_upstream::CountsSource;
use sqlx::SqlitePool;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::merge::merge_snapshots;
use crate::singleflight::SingleFlight;

/// Composes the Snapshot Store, Repository Lock, Adaptive Resolution
/// Fetcher and Upstream Batch Client into the facade external collaborators
/// call (`spec.md` §1, §4.3).
pub struct HistoryService {
    pool: SqlitePool,
    source: Arc<dyn CountsSource>,
    fetcher_config: FetcherConfig,
    service_config: HistoryServiceConfig,
    lock_config: LockConfig,
    holder_id: String,
    inflight: SingleFlight<Result<Vec<Snapshot>>>,
}

impl HistoryService {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        source: Arc<dyn CountsSource>,
        fetcher_config: FetcherConfig,
        service_config: HistoryServiceConfig,
        lock_config: LockConfig,
    ) -> Self {
        Self {
            pool,
            source,
            fetcher_config,
            service_config,
            lock_config,
            holder_id: generate_holder_id(),
            inflight: SingleFlight::new(),
        }
    }

    /// This process's lock holder identity, stable for the service's
    /// lifetime (`spec.md` §3).
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// `GetTimeline(owner, name)` (`spec.md` §4.3): a sorted, gap-filled
    /// timeline for `(owner, name)`, using cache when fresh, refreshing
    /// when stale, and coalescing concurrent in-process callers.
    ///
    /// Repository identity is case-insensitive (`spec.md` §3): `owner`/`name`
    /// are canonicalised to their lowercase form once, here, and that
    /// canonical pair is what every downstream DB lookup, lock acquisition,
    /// and upstream call sees — so `Rust-Lang/Rust` and `rust-lang/rust`
    /// always resolve to the same repository row, lock row, and
    /// single-flight slot.
    #[instrument(skip(self), fields(owner, name))]
    pub async fn get_timeline(&self, owner: &str, name: &str) -> Result<Vec<Snapshot>> {
        let key = RepositoryRef::new(owner, name).canonical_key();
        let owner = owner.to_lowercase();
        let name = name.to_lowercase();
        self.inflight
            .run(&key, || async move { self.get_timeline_uncoalesced(&owner, &name).await })
            .await
    }

    async fn get_timeline_uncoalesced(&self, owner: &str, name: &str) -> Result<Vec<Snapshot>> {
        let repo = queries::get_repository(&self.pool, owner, name).await?;

        let Some(repo) = repo else {
            info!(branch = "cold", "repository not cached, starting discovery");
            return self.refresh_cold(owner, name).await;
        };

        let cached = queries::list_snapshots(&self.pool, repo.id).await?;
        if let Some(latest) = cached.last() {
            if self.is_fresh(latest.snapshot_date) {
                info!(branch = "fresh", points = cached.len(), "serving cached timeline");
                return Ok(cached);
            }
        }

        info!(branch = "refresh", cached_points = cached.len(), "cache stale, attempting refresh");
        self.refresh_stale(owner, name, repo.id, repo.created_at, cached).await
    }

    /// `(today - latest).hours() <= CACHE_FRESHNESS_HOURS`. Snapshots are
    /// day-precision, so the delta is computed in whole days and widened
    /// to hours (`spec.md` §4.3, §9).
    fn is_fresh(&self, latest: NaiveDate) -> bool {
        let days = (today_utc() - latest).num_days().max(0);
        days * 24 <= self.service_config.cache_freshness_hours
    }

    /// State B: acquire the lock for a never-before-seen repository, then
    /// run the full discovery from the upstream-reported creation date to
    /// today.
    async fn refresh_cold(&self, owner: &str, name: &str) -> Result<Vec<Snapshot>> {
        match self.acquire_lock(owner, name).await? {
            Some(lock) => {
                let result = self.do_cold_fetch(owner, name).await;
                if let Err(e) = lock.release().await {
                    warn!(owner, name, error = %e, "failed to release lock after cold fetch");
                }
                result
            }
            None => {
                info!(branch = "wait", "lock held by another worker, waiting for progress");
                self.wait_for_progress(owner, name).await
            }
        }
    }

    async fn do_cold_fetch(&self, owner: &str, name: &str) -> Result<Vec<Snapshot>> {
        let info = self.source.repository_info(owner, name).await?;
        let repo = queries::upsert_repository(&self.pool, owner, name, &info).await?;
        let today = today_utc();

        let points =
            history_fetcher::discover(self.source.as_ref(), owner, name, info.created_at, today, &self.fetcher_config)
                .await?;
        let snapshots: Vec<Snapshot> =
            points.into_iter().map(|(d, c)| Snapshot::new(repo.id, d, c)).collect();

        // Cache writes happen only after the full fetch succeeds
        // (`spec.md` §4.2's failure semantics) — we are past the `?` above.
        queries::upsert_snapshots(&self.pool, &snapshots).await?;
        queries::touch_last_synced(&self.pool, repo.id, history_db::queries::now_naive()).await?;
        Ok(snapshots)
    }

    /// State D: acquire the lock for a stale repository and refresh from
    /// the latest cached date to today, merging with what was already
    /// cached. Falls back to stale-but-usable or the wait path when the
    /// lock is held elsewhere.
    async fn refresh_stale(
        &self,
        owner: &str,
        name: &str,
        repository_id: i64,
        repo_created_at: NaiveDate,
        cached: Vec<Snapshot>,
    ) -> Result<Vec<Snapshot>> {
        match self.acquire_lock(owner, name).await? {
            Some(lock) => {
                let result = self.do_refresh(owner, name, repository_id, repo_created_at, cached).await;
                if let Err(e) = lock.release().await {
                    warn!(owner, name, error = %e, "failed to release lock after refresh");
                }
                result
            }
            None if !cached.is_empty() => {
                info!(branch = "stale_but_usable", "lock held elsewhere, serving stale cache");
                Ok(cached)
            }
            None => {
                info!(branch = "wait", "lock held elsewhere and no cache yet, waiting");
                self.wait_for_progress(owner, name).await
            }
        }
    }

    async fn do_refresh(
        &self,
        owner: &str,
        name: &str,
        repository_id: i64,
        repo_created_at: NaiveDate,
        cached: Vec<Snapshot>,
    ) -> Result<Vec<Snapshot>> {
        let latest_date = cached.last().map_or(repo_created_at, |s| s.snapshot_date);
        let today = today_utc();

        if latest_date >= today {
            return Ok(cached);
        }

        let points =
            history_fetcher::discover(self.source.as_ref(), owner, name, latest_date, today, &self.fetcher_config)
                .await?;
        let fresh: Vec<Snapshot> =
            points.into_iter().map(|(d, c)| Snapshot::new(repository_id, d, c)).collect();

        queries::upsert_snapshots(&self.pool, &fresh).await?;
        queries::touch_last_synced(&self.pool, repository_id, history_db::queries::now_naive()).await?;
        Ok(merge_snapshots(cached, fresh))
    }

    async fn acquire_lock(&self, owner: &str, name: &str) -> Result<Option<LockHandle>> {
        LockHandle::acquire(self.pool.clone(), owner, name, self.holder_id.clone(), self.lock_config)
            .await
            .map_err(Into::into)
    }

    /// State E: poll the database until another worker's refresh leaves
    /// cached data behind, or the wait timeout elapses.
    async fn wait_for_progress(&self, owner: &str, name: &str) -> Result<Vec<Snapshot>> {
        let deadline = Instant::now() + self.service_config.lock_wait_timeout();

        loop {
            if let Some(repo) = queries::get_repository(&self.pool, owner, name).await? {
                let cached = queries::list_snapshots(&self.pool, repo.id).await?;
                if !cached.is_empty() {
                    return Ok(cached);
                }
            }

            if Instant::now() >= deadline {
                warn!(owner, name, "lock wait timed out");
                return Err(Error::Busy);
            }

            tokio::time::sleep(self.service_config.lock_wait_interval().min(remaining(deadline))).await;
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use history_core::CountTuple;
    use history_db::schema::apply_schema;
    use history_upstream::test_support::FakeUpstream;

    async fn fresh_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        apply_schema(&pool).await.unwrap();
        pool
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flat_fake(created_at: NaiveDate) -> FakeUpstream {
        FakeUpstream::new(Arc::new(|_| CountTuple { issues_created_before: 3, ..Default::default() }))
            .with_repository_info(history_core::RepositoryInfo { created_at, total_issues: 3, total_prs: 0 })
    }

    fn service(pool: SqlitePool, source: FakeUpstream) -> HistoryService {
        HistoryService::new(
            pool,
            Arc::new(source),
            FetcherConfig::default(),
            HistoryServiceConfig { cache_freshness_hours: 24, lock_wait_timeout_ms: 500, lock_wait_interval_ms: 20 },
            LockConfig::default(),
        )
    }

    #[tokio::test]
    async fn cold_repository_discovers_and_caches() {
        let pool = fresh_pool().await;
        let svc = service(pool.clone(), flat_fake(date(2024, 1, 1)));
        let timeline = svc.get_timeline("a", "b").await.unwrap();
        assert!(!timeline.is_empty());

        let repo = queries::get_repository(&pool, "a", "b").await.unwrap().unwrap();
        let persisted = queries::list_snapshots(&pool, repo.id).await.unwrap();
        assert_eq!(persisted.len(), timeline.len());
    }

    #[tokio::test]
    async fn fresh_cache_short_circuits_without_new_probes() {
        let pool = fresh_pool().await;
        let source = flat_fake(today_utc() - chrono::Duration::days(5));
        let svc = service(pool.clone(), source);
        svc.get_timeline("a", "b").await.unwrap();

        let repo = queries::get_repository(&pool, "a", "b").await.unwrap().unwrap();
        let before = queries::list_snapshots(&pool, repo.id).await.unwrap().len();

        // Second call should hit the fresh-cache branch and do no new work.
        let timeline = svc.get_timeline("a", "b").await.unwrap();
        assert_eq!(timeline.len(), before);
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_into_one_refresh() {
        let pool = fresh_pool().await;
        let svc = Arc::new(service(pool.clone(), flat_fake(date(2024, 1, 1))));

        let (a, b) = tokio::join!(svc.get_timeline("rust-lang", "rust"), svc.get_timeline("rust-lang", "rust"));
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a, b);

        // Exactly one lock row's worth of work: no lock row should remain.
        let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM repository_locks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn stale_cache_with_foreign_lock_returns_cached_without_blocking() {
        let pool = fresh_pool().await;
        let svc = service(pool.clone(), flat_fake(today_utc() - chrono::Duration::days(40)));
        svc.get_timeline("a", "b").await.unwrap();

        // Simulate another process holding the lock.
        history_db::lock::acquire(&pool, "a", "b", "other-process", &LockConfig::default())
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let timeline = svc.get_timeline("a", "b").await.unwrap();
        assert!(!timeline.is_empty());
        assert!(started.elapsed() < Duration::from_millis(200), "should not block on foreign lock");
    }

    #[tokio::test]
    async fn rate_limited_refresh_propagates_and_releases_lock() {
        let pool = fresh_pool().await;
        let source = flat_fake(date(2024, 1, 1));
        source.fail_all_with(Error::RateLimited { remaining: 0, reset_at: None });
        let svc = service(pool.clone(), source);

        let err = svc.get_timeline("a", "b").await;
        assert!(matches!(err, Err(Error::RateLimited { .. })));

        let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM repository_locks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0, "lock must be released even after a fetch failure");
    }

    #[tokio::test]
    async fn wait_path_times_out_when_nothing_ever_arrives() {
        let pool = fresh_pool().await;
        let svc = service(pool.clone(), flat_fake(date(2024, 1, 1)));

        history_db::lock::acquire(&pool, "a", "b", "other-process", &LockConfig::default())
            .await
            .unwrap();

        let err = svc.get_timeline("a", "b").await;
        assert!(matches!(err, Err(Error::Busy)));
    }
}
