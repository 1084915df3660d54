//! Error types for the database layer.

use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    /// `SQLite` error from the underlying driver.
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Connection pool error (exhaustion, timeout acquiring a connection).
    #[error("Pool error: {0}")]
    Pool(String),

    /// Resource is temporarily busy (lock contention, `SQLITE_BUSY`).
    #[error("resource temporarily busy: {0}")]
    ResourceBusy(String),

    /// Record not found.
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// Unique-constraint violation on insert.
    #[error("{entity} already exists: {identifier}")]
    Duplicate {
        entity: &'static str,
        identifier: String,
    },

    /// Invalid argument supplied by the caller.
    #[error("invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// Schema/migration error.
    #[error("schema error: {0}")]
    Schema(String),

    /// The resilience circuit breaker is open after repeated lock/busy
    /// failures; calls fail fast instead of queueing behind contention.
    #[error("circuit breaker open after {failures} consecutive failures, resets in {reset_after_secs:.1}s")]
    CircuitOpen { failures: u32, reset_after_secs: f64 },
}

/// Result type alias for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    #[must_use]
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn duplicate(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Whether this error indicates a transient lock/busy condition worth
    /// retrying once (`spec.md` §7's single lock-acquisition retry).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(msg) | Self::Pool(msg) => is_lock_error(msg),
            Self::ResourceBusy(_) => true,
            Self::NotFound { .. } | Self::Duplicate { .. } | Self::InvalidArgument { .. } | Self::Schema(_) | Self::CircuitOpen { .. } => false,
        }
    }
}

/// Checks whether an error message indicates a database lock/busy condition.
#[must_use]
pub fn is_lock_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database is busy")
        || lower.contains("busy")
}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFound {
                entity: "row",
                identifier: "<unspecified>".to_string(),
            },
            sqlx::Error::Database(db_err) if is_lock_error(&db_err.message()) => {
                Self::ResourceBusy(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut => Self::Pool(e.to_string()),
            _ => Self::Sqlite(e.to_string()),
        }
    }
}

impl From<DbError> for history_core::Error {
    fn from(e: DbError) -> Self {
        Self::StorageError(e.to_string())
    }
}
