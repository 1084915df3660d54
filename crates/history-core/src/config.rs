//! Configuration for the history engine's three tunable subsystems.
//!
//! Each `*Config` has literal defaults via [`Default`] and an opt-in
//! `from_env()` constructor. The core subsystems themselves never read
//! `std::env` — only these constructors do, so a collaborator that wants a
//! different configuration source (CLI flags, a config file) can build a
//! `FetcherConfig`/`HistoryServiceConfig`/`LockConfig` by hand instead.

use std::env;
use std::time::Duration;

/// Read an environment variable and parse it, falling back to `default` on
/// an unset or unparseable value.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tuning knobs for the adaptive resolution fetcher (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherConfig {
    /// Maximum tolerated component delta within a segment before it must
    /// be subdivided.
    pub threshold: u64,
    /// Segments longer than this are subdivided regardless of count delta.
    pub max_interval_days: i64,
    /// Segments at or below this length are never subdivided.
    pub min_interval_days: i64,
    /// Maximum probe dates per upstream batch call.
    pub max_batch: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            max_interval_days: 30,
            min_interval_days: 1,
            max_batch: 12,
        }
    }
}

impl FetcherConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            threshold: env_or("BINARY_SEARCH_THRESHOLD", default.threshold),
            max_interval_days: env_or("BINARY_SEARCH_MAX_INTERVAL", default.max_interval_days),
            min_interval_days: env_or("BINARY_SEARCH_MIN_INTERVAL", default.min_interval_days),
            max_batch: default.max_batch,
        }
    }
}

/// Tuning knobs for the history service's cache/wait behaviour (`spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryServiceConfig {
    pub cache_freshness_hours: i64,
    pub lock_wait_timeout_ms: u64,
    pub lock_wait_interval_ms: u64,
}

impl Default for HistoryServiceConfig {
    fn default() -> Self {
        Self {
            cache_freshness_hours: 24,
            lock_wait_timeout_ms: 120_000,
            lock_wait_interval_ms: 2_000,
        }
    }
}

impl HistoryServiceConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            cache_freshness_hours: env_or(
                "CACHE_FRESHNESS_HOURS",
                default.cache_freshness_hours,
            ),
            lock_wait_timeout_ms: env_or("LOCK_WAIT_TIMEOUT_MS", default.lock_wait_timeout_ms),
            lock_wait_interval_ms: env_or(
                "LOCK_WAIT_INTERVAL_MS",
                default.lock_wait_interval_ms,
            ),
        }
    }

    #[must_use]
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    #[must_use]
    pub fn lock_wait_interval(&self) -> Duration {
        Duration::from_millis(self.lock_wait_interval_ms)
    }
}

/// Tuning knobs for the distributed repository lock (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub lock_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 120_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl LockConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            lock_timeout_ms: env_or("LOCK_TIMEOUT_MS", default.lock_timeout_ms),
            heartbeat_interval_ms: env_or(
                "HEARTBEAT_INTERVAL_MS",
                default.heartbeat_interval_ms,
            ),
        }
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let f = FetcherConfig::default();
        assert_eq!(f.threshold, 50);
        assert_eq!(f.max_interval_days, 30);
        assert_eq!(f.min_interval_days, 1);
        assert_eq!(f.max_batch, 12);

        let s = HistoryServiceConfig::default();
        assert_eq!(s.cache_freshness_hours, 24);
        assert_eq!(s.lock_wait_timeout_ms, 120_000);
        assert_eq!(s.lock_wait_interval_ms, 2_000);

        let l = LockConfig::default();
        assert_eq!(l.lock_timeout_ms, 120_000);
        assert_eq!(l.heartbeat_interval_ms, 30_000);
    }

    #[test]
    fn lock_timeout_exceeds_heartbeat_by_comfortable_margin() {
        let l = LockConfig::default();
        assert!(l.lock_timeout_ms >= 2 * l.heartbeat_interval_ms);
    }
}
