//! Runtime-only `Segment` entity the adaptive fetcher subdivides
//! (`spec.md` §3, §4.2).

use chrono::NaiveDate;
use history_core::{CountTuple, FetcherConfig, days_between, midpoint_day};

/// A probed interval `(start, C(start), end, C(end))` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: NaiveDate,
    pub c_start: CountTuple,
    pub end: NaiveDate,
    pub c_end: CountTuple,
}

impl Segment {
    #[must_use]
    pub fn new(start: NaiveDate, c_start: CountTuple, end: NaiveDate, c_end: CountTuple) -> Self {
        debug_assert!(start < end, "segment endpoints must be strictly ordered");
        Self { start, c_start, end, c_end }
    }

    /// `end - start` in whole days.
    #[must_use]
    pub fn days(&self) -> i64 {
        days_between(self.start, self.end)
    }

    /// The maximum componentwise delta between the two endpoint tuples —
    /// the "count span" `spec.md` §3 defines for a segment.
    #[must_use]
    pub fn max_component_delta(&self) -> u64 {
        self.c_start.max_component_delta(&self.c_end)
    }

    /// The midpoint date, floored to a UTC day boundary (`spec.md` §4.2).
    #[must_use]
    pub fn midpoint(&self) -> NaiveDate {
        midpoint_day(self.start, self.end)
    }

    /// Whether a midpoint probe would collapse back onto `start` — the
    /// adjacent-day case the tie-break rule guards against infinite
    /// subdivision for.
    #[must_use]
    pub fn midpoint_collapses(&self) -> bool {
        self.midpoint() == self.start
    }

    /// `should_subdivide(s)` from `spec.md` §4.2:
    /// - `days(s) <= MIN_INTERVAL_DAYS` → never subdivide.
    /// - otherwise, subdivide if the count span exceeds `THRESHOLD`, or the
    ///   segment is longer than `MAX_INTERVAL_DAYS` regardless of count span.
    #[must_use]
    pub fn should_subdivide(&self, config: &FetcherConfig) -> bool {
        if self.days() <= config.min_interval_days {
            return false;
        }
        self.max_component_delta() > config.threshold || self.days() > config.max_interval_days
    }

    /// Whether this segment satisfies the terminal-segment invariant
    /// (`spec.md` §8): either it is at or below `MIN_INTERVAL_DAYS`, or its
    /// count span and length are both within bounds.
    #[must_use]
    pub fn is_terminal(&self, config: &FetcherConfig) -> bool {
        !self.should_subdivide(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tuple(n: u64) -> CountTuple {
        CountTuple {
            issues_created_before: n,
            ..Default::default()
        }
    }

    #[test]
    fn short_segment_never_subdivides_regardless_of_delta() {
        let config = FetcherConfig { min_interval_days: 1, ..FetcherConfig::default() };
        let seg = Segment::new(date(2024, 1, 1), tuple(0), date(2024, 1, 2), tuple(10_000));
        assert!(!seg.should_subdivide(&config));
    }

    #[test]
    fn large_delta_forces_subdivision() {
        let config = FetcherConfig::default();
        let seg = Segment::new(date(2024, 1, 1), tuple(0), date(2024, 1, 10), tuple(500));
        assert!(seg.should_subdivide(&config));
    }

    #[test]
    fn flat_history_does_not_subdivide_within_max_interval() {
        let config = FetcherConfig::default();
        let seg = Segment::new(date(2024, 1, 1), tuple(5), date(2024, 1, 20), tuple(5));
        assert!(!seg.should_subdivide(&config));
    }

    #[test]
    fn long_flat_segment_subdivides_on_length_alone() {
        let config = FetcherConfig::default();
        let seg = Segment::new(date(2024, 1, 1), tuple(5), date(2024, 3, 1), tuple(5));
        assert!(seg.should_subdivide(&config));
    }

    #[test]
    fn adjacent_days_collapse_midpoint_to_start() {
        let seg = Segment::new(date(2024, 1, 1), tuple(0), date(2024, 1, 2), tuple(10_000));
        assert!(seg.midpoint_collapses());
    }
}
