//! A deterministic in-memory fake of the upstream API.
//!
//! Used by `history-fetcher` and `history-service` tests in place of real
//! network I/O, in the teacher's style of hand-rolled fakes over mocking
//! frameworks.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use history_core::{CountTuple, Error, RepositoryInfo, Result};

use crate::client::RateLimit;
use crate::source::CountsSource;

/// A function from probe date to counts, the fake's "ground truth" timeline.
pub type CountsFn = std::sync::Arc<dyn Fn(NaiveDate) -> CountTuple + Send + Sync>;

/// A scripted, in-memory stand-in for [`crate::UpstreamClient`].
///
/// Construct with [`FakeUpstream::new`] and a ground-truth function, then
/// optionally arrange for specific calls to fail with
/// [`FakeUpstream::fail_repository`] / [`FakeUpstream::fail_all_with`].
/// Every probed date is recorded in [`FakeUpstream::probed_dates`] so tests
/// can assert on call volume.
pub struct FakeUpstream {
    ground_truth: CountsFn,
    repo_info: Option<RepositoryInfo>,
    max_batch: usize,
    fail_with: Mutex<Option<Error>>,
    probed: Mutex<Vec<NaiveDate>>,
    rate_limit: RateLimit,
}

impl FakeUpstream {
    #[must_use]
    pub fn new(ground_truth: CountsFn) -> Self {
        Self {
            ground_truth,
            repo_info: None,
            max_batch: crate::client::DEFAULT_MAX_BATCH,
            fail_with: Mutex::new(None),
            probed: Mutex::new(Vec::new()),
            rate_limit: RateLimit { remaining: 5000, reset_at: None },
        }
    }

    #[must_use]
    pub fn with_repository_info(mut self, info: RepositoryInfo) -> Self {
        self.repo_info = Some(info);
        self
    }

    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Makes every subsequent call fail with `error` until cleared.
    pub fn fail_all_with(&self, error: Error) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    /// Convenience for a `NotFound` simulation.
    pub fn fail_repository(&self, owner: &str, name: &str) {
        self.fail_all_with(Error::NotFound(format!("{owner}/{name}")));
    }

    /// The dates probed so far, in call order (duplicates included).
    #[must_use]
    pub fn probed_dates(&self) -> Vec<NaiveDate> {
        self.probed.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<()> {
        if let Some(err) = self.fail_with.lock().unwrap().as_ref() {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl CountsSource for FakeUpstream {
    async fn repository_info(&self, owner: &str, name: &str) -> Result<RepositoryInfo> {
        self.check_failure()?;
        self.repo_info
            .clone()
            .ok_or_else(|| Error::NotFound(format!("{owner}/{name}")))
    }

    async fn counts_at(
        &self,
        _owner: &str,
        _name: &str,
        dates: &[NaiveDate],
    ) -> Result<HashMap<NaiveDate, CountTuple>> {
        self.check_failure()?;
        if dates.len() > self.max_batch {
            return Err(Error::BatchTooLarge {
                len: dates.len(),
                max: self.max_batch,
            });
        }
        if dates.is_empty() {
            return Ok(HashMap::new());
        }
        self.probed.lock().unwrap().extend(dates.iter().copied());
        Ok(dates.iter().map(|&d| (d, (self.ground_truth)(d))).collect())
    }

    async fn rate_limit(&self) -> Result<RateLimit> {
        self.check_failure()?;
        Ok(self.rate_limit)
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn ground_truth_function_drives_counts() {
        let fake = FakeUpstream::new(std::sync::Arc::new(|d: NaiveDate| CountTuple {
            issues_created_before: d.day() as u64,
            ..Default::default()
        }));
        use chrono::Datelike;
        let d = date(2024, 1, 15);
        let result = fake.counts_at("o", "n", &[d]).await.unwrap();
        assert_eq!(result[&d].issues_created_before, 15);
    }

    #[tokio::test]
    async fn scripted_failure_applies_to_every_call() {
        let fake = FakeUpstream::new(std::sync::Arc::new(|_| CountTuple::default()));
        fake.fail_repository("rust-lang", "rust");
        let err = fake.counts_at("rust-lang", "rust", &[date(2024, 1, 1)]).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn batch_too_large_is_rejected() {
        let fake = FakeUpstream::new(std::sync::Arc::new(|_| CountTuple::default())).with_max_batch(1);
        let dates = [date(2024, 1, 1), date(2024, 1, 2)];
        let err = fake.counts_at("o", "n", &dates).await;
        assert!(matches!(err, Err(Error::BatchTooLarge { len: 2, max: 1 })));
    }
}
