//! Snapshot Store and Repository Lock for the repository activity history
//! engine (`spec.md` §3, §4.4, §6).
//!
//! This crate owns the only SQL in the workspace. `history-service` never
//! writes a query directly — it calls through [`queries`] and [`lock`].

#![forbid(unsafe_code)]

pub mod error;
pub mod lock;
pub mod models;
pub mod pool;
pub mod queries;
pub mod retry;
pub mod schema;

pub use error::{DbError, DbResult, is_lock_error};
pub use lock::{LockHandle, generate_holder_id};
pub use models::{RepositoryLockRow, RepositoryRow, SnapshotRow};
pub use pool::{DEFAULT_ACQUIRE_TIMEOUT_MS, DbPoolConfig, auto_pool_size, connect};
pub use retry::{CIRCUIT_BREAKER, CircuitBreaker, CircuitState, with_retry};
