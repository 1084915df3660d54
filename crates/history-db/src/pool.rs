//! Connection pool configuration and initialization.
//!
//! Uses `sqlx`'s `SqlitePool` for connection management.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::DbResult;
use crate::schema;

pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 15_000;

/// Auto-detects a reasonable pool size from available CPU parallelism.
///
/// `SQLite` in WAL mode allows unlimited concurrent readers but serializes
/// writers, so headroom mostly helps reads: `clamp(cpus * 4, 8, 32)`.
#[must_use]
pub fn auto_pool_size() -> u32 {
    let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZero::get);
    u32::try_from(cpus * 4).unwrap_or(u32::MAX).clamp(8, 32)
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// `sqlite:///path/to/db.sqlite3` or `sqlite::memory:`.
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Whether to run [`schema::apply_schema`] immediately after connecting.
    pub run_migrations: bool,
}

impl DbPoolConfig {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: auto_pool_size(),
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            run_migrations: true,
        }
    }

    /// Reads `DB_URL` (required) and optional pool-size overrides from the
    /// environment. The core crates never call this themselves — only the
    /// composition root opts into it.
    pub fn from_env() -> DbResult<Self> {
        let database_url = std::env::var("DB_URL")
            .map_err(|_| crate::error::DbError::invalid("DB_URL", "not set"))?;
        let mut cfg = Self::new(database_url);
        if let Ok(v) = std::env::var("DATABASE_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.max_connections = n;
            }
        }
        if let Ok(v) = std::env::var("DATABASE_ACQUIRE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.acquire_timeout_ms = n;
            }
        }
        Ok(cfg)
    }
}

/// Opens a pool against `config.database_url`, creating the file (or
/// in-memory database) if it does not already exist, and applying the
/// schema when `config.run_migrations` is set.
pub async fn connect(config: &DbPoolConfig) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| crate::error::DbError::Sqlite(e.to_string()))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await?;

    if config.run_migrations {
        schema::apply_schema(&pool).await?;
    }

    Ok(pool)
}
