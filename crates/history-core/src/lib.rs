//! Core types, configuration, and errors for the repository activity
//! history engine.
//!
//! This crate provides:
//! - The shared data model (`RepositoryRef`, `CountTuple`, `Snapshot`, ...)
//! - Configuration for the fetcher, history service, and repository lock
//! - The shared error taxonomy
//! - UTC date arithmetic used by the adaptive resolution fetcher
//! - Lightweight atomic counters for observability

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod time;

pub use config::{FetcherConfig, HistoryServiceConfig, LockConfig};
pub use error::{Error, Result};
pub use metrics::{Counter, GaugeI64};
pub use model::{CountTuple, Repository, RepositoryInfo, RepositoryRef, Snapshot};
pub use time::{days_between, midpoint_day, today_utc};
