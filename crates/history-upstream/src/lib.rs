//! GraphQL batch client for the repository activity history engine's
//! upstream API (`spec.md` §4.1).
//!
//! [`UpstreamClient`] is the production implementation; [`test_support::FakeUpstream`]
//! is a deterministic in-memory stand-in used by `history-fetcher` and
//! `history-service` tests so they never need real network I/O.

#![forbid(unsafe_code)]

pub mod client;
pub mod query;
pub mod source;
pub mod test_support;

pub use client::{RateLimit, UpstreamClient, DEFAULT_MAX_BATCH};
pub use source::CountsSource;
