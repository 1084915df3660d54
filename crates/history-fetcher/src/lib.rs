//! The Adaptive Resolution Fetcher (`spec.md` §4.2).
//!
//! Turns a high-latency, rate-limited "count at date" probe into a dense
//! timeline at the lowest possible query cost, by subdividing segments whose
//! endpoints disagree by more than a configured tolerance.

#![forbid(unsafe_code)]

pub mod fetcher;
pub mod segment;

pub use fetcher::discover;
pub use segment::Segment;
