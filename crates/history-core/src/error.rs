//! The shared error taxonomy for the history engine.
//!
//! Every subsystem — upstream client, fetcher, lock, service — ultimately
//! fails with one of these variants. Per-crate error types exist where a
//! crate needs extra context (e.g. `history_db::DbError` carries the
//! failing query name), but they all convert into [`Error`] at their public
//! boundary, so a collaborator only ever has to match one enum.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the history engine's public operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The repository does not exist upstream.
    #[error("repository not found: {0}")]
    NotFound(String),

    /// Upstream quota is exhausted. `reset_at` is epoch seconds when it
    /// refills, when known.
    #[error("rate limited, resets at {reset_at:?}")]
    RateLimited { remaining: i64, reset_at: Option<i64> },

    /// Network or non-2xx HTTP failure talking to the upstream API.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream reply could not be parsed, or its `errors` array
    /// contained something other than a rate-limit marker.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The lock-wait path exceeded its timeout without making progress.
    #[error("busy: another refresh is in progress, try again shortly")]
    Busy,

    /// A caller asked for more probe dates in one batch than the upstream
    /// client's configured ceiling allows. Always a programmer error.
    #[error("batch of {len} dates exceeds max batch size {max}")]
    BatchTooLarge { len: usize, max: usize },

    /// Persistent storage (snapshot store or lock table) failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// A caller supplied a malformed `owner` or `name`.
    #[error("invalid repository reference: {0}")]
    InvalidReference(String),
}

impl Error {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
    }
}
