//! Resilience helpers for `SQLite` lock contention.
//!
//! `SQLITE_BUSY` (surfaced as [`DbError::ResourceBusy`]/[`DbError::Sqlite`]
//! with a lock-shaped message) is expected under write concurrency even with
//! WAL mode enabled, since the repository lock table and the snapshot table
//! are written by every concurrent refresh worker. [`with_retry`] wraps a
//! single DB operation in exponential backoff (via the `backoff` crate) and a
//! small circuit breaker that fails fast once contention looks sustained,
//! rather than queueing every caller behind the same lock indefinitely.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoffBuilder;

use crate::error::{DbError, DbResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation — all calls pass through.
    Closed,
    /// Failing fast — calls are rejected immediately.
    Open,
    /// Reset window elapsed; one probe call is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thread-safe circuit breaker guarding repeated DB lock contention.
pub struct CircuitBreaker {
    failures: AtomicU32,
    open_until_us: AtomicU64,
    threshold: u32,
    reset_duration: Duration,
    epoch: Instant,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, reset_duration: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            open_until_us: AtomicU64::new(0),
            threshold,
            reset_duration,
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        let open_until = self.open_until_us.load(Ordering::Acquire);
        let now_us = self.now_us();
        if open_until > 0 && now_us < open_until {
            return CircuitState::Open;
        }
        if self.failures.load(Ordering::Acquire) >= self.threshold {
            return CircuitState::HalfOpen;
        }
        CircuitState::Closed
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn remaining_open_secs(&self) -> f64 {
        let open_until = self.open_until_us.load(Ordering::Acquire);
        let now_us = self.now_us();
        if open_until == 0 || now_us >= open_until {
            return 0.0;
        }
        (open_until - now_us) as f64 / 1_000_000.0
    }

    pub fn check(&self) -> DbResult<()> {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(DbError::CircuitOpen {
                failures: self.failures.load(Ordering::Acquire),
                reset_after_secs: self.remaining_open_secs(),
            }),
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.open_until_us.store(0, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let new_count = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if new_count >= self.threshold {
            let open_until = self.now_us() + micros_from_duration(self.reset_duration);
            self.open_until_us.store(open_until, Ordering::Release);
        }
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        self.open_until_us.store(0, Ordering::Release);
    }

    fn now_us(&self) -> u64 {
        micros_from_duration(self.epoch.elapsed())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn micros_from_duration(d: Duration) -> u64 {
    let us = d.as_micros();
    if us > u64::MAX as u128 { u64::MAX } else { us as u64 }
}

/// The process-wide circuit breaker covering the snapshot store and the
/// repository lock table: five consecutive lock failures open it for 30s.
pub static CIRCUIT_BREAKER: std::sync::LazyLock<CircuitBreaker> =
    std::sync::LazyLock::new(CircuitBreaker::default);

/// Runs `op`, retrying on [`DbError::is_retryable`] failures with
/// exponential backoff (50ms base, 8s cap) until `max_elapsed` passes, and
/// consulting [`CIRCUIT_BREAKER`] before every attempt.
pub async fn with_retry<T, F, Fut>(max_elapsed: Duration, mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = DbResult<T>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(8))
        .with_max_elapsed_time(Some(max_elapsed))
        .build();

    backoff::future::retry(backoff, || async {
        CIRCUIT_BREAKER.check().map_err(backoff::Error::Permanent)?;
        match op().await {
            Ok(v) => {
                CIRCUIT_BREAKER.record_success();
                Ok(v)
            }
            Err(e) if e.is_retryable() => {
                CIRCUIT_BREAKER.record_failure();
                Err(backoff::Error::transient(e))
            }
            Err(e) => Err(backoff::Error::Permanent(e)),
        }
    })
    .await
    .map_err(|e| match e {
        backoff::Error::Permanent(e) | backoff::Error::Transient { err: e, .. } => e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn circuit_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(DbError::CircuitOpen { .. })));
    }

    #[test]
    fn circuit_breaker_half_opens_after_reset_window() {
        let cb = CircuitBreaker::new(2, Duration::from_millis(20));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(35));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn success_clears_failures() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn with_retry_succeeds_immediately() {
        CIRCUIT_BREAKER.reset();
        let result: DbResult<i32> = with_retry(Duration::from_secs(1), || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn with_retry_eventually_succeeds_past_transient_busy() {
        CIRCUIT_BREAKER.reset();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: DbResult<&str> = with_retry(Duration::from_secs(2), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DbError::ResourceBusy("database is locked".into()))
            } else {
                Ok("ok")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        CIRCUIT_BREAKER.reset();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: DbResult<()> = with_retry(Duration::from_secs(1), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DbError::not_found("repository", "a/b"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
