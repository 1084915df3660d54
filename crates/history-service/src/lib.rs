//! The History Service: cache-aware, lock-coordinated, single-flight
//! retrieval of a repository's activity timeline (`spec.md` §4.3).
//!
//! Composes [`history_fetcher::discover`], [`history_db`]'s Snapshot Store
//! and Repository Lock, and [`history_upstream`]'s batch client behind one
//! call: [`HistoryService::get_timeline`].

#![forbid(unsafe_code)]

mod merge;
mod service;
mod singleflight;

pub use history_core::Error;
pub use service::HistoryService;
