//! The abstract upstream surface the fetcher and history service depend on.
//!
//! Keeping this as a trait (rather than a concrete `reqwest` type) lets
//! `history-fetcher` and `history-service` run their test suites against
//! [`crate::test_support::FakeUpstream`] instead of real network I/O.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use history_core::{CountTuple, Result};

use crate::client::{RateLimit, UpstreamClient};
use history_core::RepositoryInfo;

#[async_trait]
pub trait CountsSource: Send + Sync {
    async fn repository_info(&self, owner: &str, name: &str) -> Result<RepositoryInfo>;

    async fn counts_at(
        &self,
        owner: &str,
        name: &str,
        dates: &[NaiveDate],
    ) -> Result<HashMap<NaiveDate, CountTuple>>;

    async fn rate_limit(&self) -> Result<RateLimit>;

    fn max_batch(&self) -> usize;
}

#[async_trait]
impl CountsSource for UpstreamClient {
    async fn repository_info(&self, owner: &str, name: &str) -> Result<RepositoryInfo> {
        Self::repository_info(self, owner, name).await
    }

    async fn counts_at(
        &self,
        owner: &str,
        name: &str,
        dates: &[NaiveDate],
    ) -> Result<HashMap<NaiveDate, CountTuple>> {
        Self::counts_at(self, owner, name, dates).await
    }

    async fn rate_limit(&self) -> Result<RateLimit> {
        Self::rate_limit(self).await
    }

    fn max_batch(&self) -> usize {
        Self::max_batch(self)
    }
}
